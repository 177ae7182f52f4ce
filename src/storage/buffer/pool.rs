//! Buffer pool manager.

use std::collections::HashMap;
use std::sync::Mutex;

use super::error::BufferPoolError;
use super::frame::{Frame, FrameId, FrameMetadata};
use super::guard::{PageGuard, PageReadGuard, PageWriteGuard};
use super::replacer::Replacer;
use crate::storage::io::Storage;
use crate::storage::page::{PageBuf, PageId};
use crate::storage::scheduler::{DiskRequest, DiskScheduler};

/// The buffer pool: maps logical pages into a fixed set of in-memory
/// frames and hands out pinned guards to callers.
///
/// # Architecture
///
/// ```text
/// +-------------------+
/// | Index / executors |
/// +-------------------+
///          |
///          v
/// +-------------------+
/// | BufferPool        |  <- page table, pins, eviction
/// +-------------------+
///          |
///          v
/// +-------------------+
/// | DiskScheduler     |  <- FIFO background I/O
/// +-------------------+
/// ```
///
/// # Locking
///
/// All residency state (page table, frame metadata, free list, replacer,
/// page-id allocator) sits behind a single `std::sync::Mutex`, which keeps
/// it accessible from synchronous `Drop` impls. The mutex is *not* held
/// across disk waits; instead, eviction re-validates the victim's pin
/// count, residency, and dirty flag after the write-back and retries with
/// another victim when the frame was touched concurrently.
///
/// Frame byte buffers are protected by independent per-frame latches (see
/// [`super::guard`]). Lock order: a frame latch may be held while taking
/// the state mutex (guards do this on drop); the state mutex is never held
/// while acquiring a frame latch.
pub struct BufferPool<S: Storage, R: Replacer> {
    inner: BufferPoolInner<S, R>,
}

/// Pool internals, shared with the guards for the unpin-on-drop path.
pub(super) struct BufferPoolInner<S: Storage, R: Replacer> {
    /// Background disk I/O.
    scheduler: DiskScheduler<S>,

    /// Frame buffers, each behind its own latch. The vector itself is
    /// immutable after construction.
    pub(super) frames: Vec<Frame>,

    /// All mutable residency state.
    state: Mutex<PoolState<R>>,

    pool_size: usize,
}

/// State guarded by the pool mutex.
struct PoolState<R> {
    /// Maps resident pages to their frames.
    page_table: HashMap<PageId, FrameId>,

    /// Residency metadata per frame, indexed by `FrameId`.
    frame_metadata: Vec<FrameMetadata>,

    /// Frames not holding any page.
    free_list: Vec<FrameId>,

    /// Replacement policy over unpinned frames.
    replacer: R,

    /// Next page id handed out when the recycled list is empty.
    next_page_id: i32,

    /// Ids of deleted pages, reused before the counter advances.
    recycled_ids: Vec<PageId>,
}

impl<R> PoolState<R> {
    fn allocate_page_id(&mut self) -> PageId {
        if let Some(page_id) = self.recycled_ids.pop() {
            return page_id;
        }
        let page_id = PageId::new(self.next_page_id);
        self.next_page_id += 1;
        page_id
    }
}

impl<S: Storage + 'static, R: Replacer> BufferPool<S, R> {
    /// Creates a buffer pool with `pool_size` frames over the given
    /// storage backend and replacement policy.
    ///
    /// Must be called from within a tokio runtime (the disk scheduler
    /// spawns its worker task).
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is 0.
    pub fn new(storage: S, replacer: R, pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<_> = (0..pool_size).map(|_| Frame::new()).collect();
        let frame_metadata: Vec<_> = (0..pool_size).map(|_| FrameMetadata::new()).collect();
        let free_list: Vec<_> = (0..pool_size).map(FrameId::new).collect();

        Self {
            inner: BufferPoolInner {
                scheduler: DiskScheduler::new(storage),
                frames,
                state: Mutex::new(PoolState {
                    page_table: HashMap::with_capacity(pool_size),
                    frame_metadata,
                    free_list,
                    replacer,
                    next_page_id: 0,
                    recycled_ids: Vec::new(),
                }),
                pool_size,
            },
        }
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.inner.lock_state().page_table.len()
    }

    /// Returns the pin count of a resident page, or `None` if the page is
    /// not in the pool.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.lock_state();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(state.frame_metadata[frame_id.as_usize()].pin_count)
    }

    /// Returns the dirty flag of a resident page, or `None` if the page is
    /// not in the pool.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.inner.lock_state();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(state.frame_metadata[frame_id.as_usize()].is_dirty)
    }

    /// Allocates a fresh page (zeroed) and returns a pinned guard on it.
    ///
    /// Deleted page ids are recycled before the counter advances.
    ///
    /// # Errors
    ///
    /// `BufferPoolError::NoFreeFrames` when every frame is pinned.
    pub async fn new_page(&self) -> Result<PageGuard<'_, S, R>, BufferPoolError> {
        let frame_id = self.inner.allocate_frame().await?;

        {
            let mut data = self.inner.frames[frame_id.as_usize()].data.write().await;
            data.zero();
        }

        let page_id;
        {
            let mut state = self.inner.lock_state();
            page_id = state.allocate_page_id();
            state.page_table.insert(page_id, frame_id);
            state.frame_metadata[frame_id.as_usize()].reset(page_id);
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
        }

        Ok(PageGuard {
            pool: &self.inner,
            frame_id,
            page_id,
            is_dirty: false,
        })
    }

    /// Fetches a page into the pool and returns a pinned (unlatched)
    /// guard.
    ///
    /// On a hit the resident frame is pinned directly; on a miss a frame
    /// is claimed (evicting if necessary) and the page is read through the
    /// disk scheduler.
    ///
    /// # Errors
    ///
    /// - `BufferPoolError::NoFreeFrames` when every frame is pinned.
    /// - `BufferPoolError::Storage` when the disk read fails.
    pub async fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_, S, R>, BufferPoolError> {
        // Fast path: already resident.
        {
            let mut state = self.inner.lock_state();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                state.frame_metadata[frame_id.as_usize()].pin();
                state.replacer.record_access(frame_id);
                state.replacer.set_evictable(frame_id, false);
                return Ok(PageGuard {
                    pool: &self.inner,
                    frame_id,
                    page_id,
                    is_dirty: false,
                });
            }
        }

        // Miss: claim a frame and read the page in.
        let frame_id = self.inner.allocate_frame().await?;

        let (done, completion) = DiskScheduler::<S>::create_promise();
        self.inner.scheduler.schedule(DiskRequest {
            is_write: false,
            data: PageBuf::new(),
            page_id,
            done,
        });
        let read = match completion.await {
            Ok(result) => result,
            Err(_) => {
                self.inner.lock_state().free_list.push(frame_id);
                return Err(completion_dropped());
            }
        };
        let data = match read {
            Ok(buf) => buf,
            Err(e) => {
                // Return the frame to the free list to avoid leaking it.
                self.inner.lock_state().free_list.push(frame_id);
                return Err(e.into());
            }
        };

        {
            let mut frame = self.inner.frames[frame_id.as_usize()].data.write().await;
            frame.as_mut_slice().copy_from_slice(data.as_slice());
        }

        {
            let mut state = self.inner.lock_state();

            // Another task may have loaded this page while we were doing
            // I/O; discard the redundant frame and use theirs.
            if let Some(&existing) = state.page_table.get(&page_id) {
                state.free_list.push(frame_id);
                state.frame_metadata[existing.as_usize()].pin();
                state.replacer.record_access(existing);
                state.replacer.set_evictable(existing, false);
                return Ok(PageGuard {
                    pool: &self.inner,
                    frame_id: existing,
                    page_id,
                    is_dirty: false,
                });
            }

            state.page_table.insert(page_id, frame_id);
            state.frame_metadata[frame_id.as_usize()].reset(page_id);
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
        }

        Ok(PageGuard {
            pool: &self.inner,
            frame_id,
            page_id,
            is_dirty: false,
        })
    }

    /// Fetches a page and acquires its shared latch.
    pub async fn fetch_page_read(
        &self,
        page_id: PageId,
    ) -> Result<PageReadGuard<'_, S, R>, BufferPoolError> {
        Ok(self.fetch_page(page_id).await?.upgrade_read().await)
    }

    /// Fetches a page and acquires its exclusive latch.
    pub async fn fetch_page_write(
        &self,
        page_id: PageId,
    ) -> Result<PageWriteGuard<'_, S, R>, BufferPoolError> {
        Ok(self.fetch_page(page_id).await?.upgrade_write().await)
    }

    /// Explicitly unpins a page.
    ///
    /// Guards do this automatically on drop; this entry point exists for
    /// callers managing pins by hand. Returns false if the page is not
    /// resident or its pin count is already zero. The dirty flag is OR'd
    /// in; unpinning never cleans a page.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.inner.lock_state();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.frame_metadata[frame_id.as_usize()];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a resident page back to storage and clears its dirty flag.
    ///
    /// The write happens regardless of the dirty state. Returns
    /// `Ok(false)` if the page is not resident.
    ///
    /// # Errors
    ///
    /// `BufferPoolError::Storage` when the disk write fails.
    pub async fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let frame_id = {
            let state = self.inner.lock_state();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return Ok(false),
            }
        };

        // Snapshot the bytes under the shared latch. The frame may have
        // been evicted and remapped between the lookup and the latch, so
        // residency is re-validated before copying.
        let mut buf = PageBuf::new();
        {
            let data = self.inner.frames[frame_id.as_usize()].data.read().await;
            {
                let state = self.inner.lock_state();
                let still_resident = state.frame_metadata[frame_id.as_usize()].page_id
                    == Some(page_id);
                if !still_resident {
                    return Ok(false);
                }
            }
            buf.as_mut_slice().copy_from_slice(data.as_slice());
        }

        let (done, completion) = DiskScheduler::<S>::create_promise();
        self.inner.scheduler.schedule(DiskRequest {
            is_write: true,
            data: buf,
            page_id,
            done,
        });
        completion.await.map_err(|_| completion_dropped())??;

        let mut state = self.inner.lock_state();
        if state.frame_metadata[frame_id.as_usize()].page_id == Some(page_id) {
            state.frame_metadata[frame_id.as_usize()].is_dirty = false;
        }
        Ok(true)
    }

    /// Flushes every resident page, waiting on each completion in turn.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; later pages stay unflushed.
    pub async fn flush_all(&self) -> Result<(), BufferPoolError> {
        let pages: Vec<PageId> = {
            let state = self.inner.lock_state();
            state.page_table.keys().copied().collect()
        };

        for page_id in pages {
            self.flush_page(page_id).await?;
        }
        Ok(())
    }

    /// Deletes a page from the pool and recycles its id.
    ///
    /// Returns true if the page is absent (nothing to do) or was deleted;
    /// false if the page is pinned. The dropped bytes are *not* written
    /// back: deletion discards the page.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.inner.lock_state();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        if state.frame_metadata[frame_id.as_usize()].pin_count > 0 {
            return false;
        }

        state.frame_metadata[frame_id.as_usize()].clear();
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push(frame_id);
        state.recycled_ids.push(page_id);
        true
    }
}

impl<S: Storage, R: Replacer> BufferPoolInner<S, R> {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState<R>> {
        self.state.lock().expect("pool state lock poisoned")
    }

    /// Drops one pin (called from guard `Drop` impls).
    ///
    /// # Panics
    ///
    /// Panics if the pin count is already zero: a guard that does not own
    /// a pin is a programming error.
    pub(super) fn unpin_frame(&self, frame_id: FrameId, is_dirty: bool) {
        let mut state = self.lock_state();
        let meta = &mut state.frame_metadata[frame_id.as_usize()];
        assert!(
            meta.pin_count > 0,
            "page guard dropped with pin count already zero"
        );
        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
    }
}

impl<S: Storage + 'static, R: Replacer> BufferPoolInner<S, R> {
    /// Claims a frame for a new occupant: from the free list if possible,
    /// otherwise by evicting a replacer victim (writing it back first when
    /// dirty).
    ///
    /// The victim's dirty flag is cleared when it is chosen, so a
    /// concurrent re-dirty during the write-back is visible at the
    /// re-validation below and forces a retry.
    async fn allocate_frame(&self) -> Result<FrameId, BufferPoolError> {
        loop {
            let (frame_id, old_page_id, was_dirty) = {
                let mut state = self.lock_state();
                if let Some(frame_id) = state.free_list.pop() {
                    return Ok(frame_id);
                }
                let Some(frame_id) = state.replacer.evict() else {
                    return Err(BufferPoolError::NoFreeFrames);
                };
                let meta = &mut state.frame_metadata[frame_id.as_usize()];
                let old_page_id = meta.page_id;
                let was_dirty = meta.is_dirty;
                meta.is_dirty = false;
                (frame_id, old_page_id, was_dirty)
            };

            if let Some(victim_page_id) = old_page_id {
                if was_dirty {
                    tracing::trace!(
                        page_id = victim_page_id.page_num(),
                        frame_id = frame_id.as_usize(),
                        "writing back dirty page before eviction"
                    );

                    // Hold the exclusive latch across the snapshot so no
                    // writer can slip in between copy and write-back.
                    let mut buf = PageBuf::new();
                    {
                        let data = self.frames[frame_id.as_usize()].data.write().await;
                        buf.as_mut_slice().copy_from_slice(data.as_slice());
                    }

                    let (done, completion) = DiskScheduler::<S>::create_promise();
                    self.scheduler.schedule(DiskRequest {
                        is_write: true,
                        data: buf,
                        page_id: victim_page_id,
                        done,
                    });
                    let write = completion.await.map_err(|_| completion_dropped());
                    if let Err(e) = write.and_then(|r| r.map_err(BufferPoolError::from)) {
                        // The bytes never reached disk; restore the dirty
                        // flag and hand the frame back to the replacer
                        // before bailing out.
                        let mut state = self.lock_state();
                        state.frame_metadata[frame_id.as_usize()].is_dirty = true;
                        if state.frame_metadata[frame_id.as_usize()].pin_count == 0 {
                            state.replacer.record_access(frame_id);
                            state.replacer.set_evictable(frame_id, true);
                        }
                        return Err(e);
                    }
                }
            }

            {
                let mut state = self.lock_state();
                let meta = &mut state.frame_metadata[frame_id.as_usize()];
                let undisturbed = meta.page_id == old_page_id && meta.pin_count == 0;

                if undisturbed && !meta.is_dirty {
                    if let Some(victim_page_id) = old_page_id {
                        state.page_table.remove(&victim_page_id);
                    }
                    state.frame_metadata[frame_id.as_usize()].clear();
                    // A pin/unpin cycle during the write-back re-registers
                    // the frame with the replacer; drop that stale node so
                    // no one else can evict the frame we just claimed.
                    state.replacer.remove(frame_id);
                    return Ok(frame_id);
                }

                if undisturbed {
                    // Re-dirtied while we wrote it back: hand the frame
                    // back to the replacer so it can be chosen again.
                    state.replacer.record_access(frame_id);
                    state.replacer.set_evictable(frame_id, true);
                }
                // Otherwise the frame was re-pinned or deleted; either way
                // it is no longer ours. Pick another victim.
            }
        }
    }
}

fn completion_dropped() -> BufferPoolError {
    BufferPoolError::Internal("disk scheduler completion dropped".to_string())
}
