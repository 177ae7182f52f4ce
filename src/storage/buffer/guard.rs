//! RAII guards for buffer pool page access.
//!
//! Three guard variants form a scoped ownership chain:
//!
//! - [`PageGuard`]: holds a pin only. Upgrading consumes it and acquires
//!   the frame's latch, yielding one of the typed guards.
//! - [`PageReadGuard`]: pin + shared latch; immutable access to the bytes.
//! - [`PageWriteGuard`]: pin + exclusive latch; mutable access. Dropping a
//!   write guard always marks the page dirty.
//!
//! Every guard releases exactly what it acquired, exactly once, on drop;
//! the latch is released before the pin (enforced by field order). Guards
//! are move-only, so a double release is impossible by construction.

use std::ops::{Deref, DerefMut};

use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};

use super::frame::FrameId;
use super::pool::BufferPoolInner;
use super::replacer::Replacer;
use crate::storage::io::Storage;
use crate::storage::page::{PageBuf, PageId};

/// A pinned page without a latch.
///
/// The basic guard keeps the page resident but does not grant access to
/// its bytes; upgrade to a [`PageReadGuard`] or [`PageWriteGuard`] for
/// that. Dropping the guard unpins the page, passing along the dirty
/// override set via [`PageGuard::mark_dirty`].
pub struct PageGuard<'a, S: Storage, R: Replacer> {
    pub(super) pool: &'a BufferPoolInner<S, R>,
    pub(super) frame_id: FrameId,
    pub(super) page_id: PageId,
    pub(super) is_dirty: bool,
}

impl<'a, S: Storage, R: Replacer> PageGuard<'a, S, R> {
    /// Returns the id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Marks the page dirty when this guard is dropped, even without a
    /// write upgrade.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Consumes the guard, acquires the frame's shared latch, and returns
    /// a read guard carrying the same pin.
    pub async fn upgrade_read(self) -> PageReadGuard<'a, S, R> {
        let latch = self.pool.frames[self.frame_id.as_usize()].data.read().await;
        let base = PageGuard {
            pool: self.pool,
            frame_id: self.frame_id,
            page_id: self.page_id,
            is_dirty: self.is_dirty,
        };
        // The pin now belongs to `base`; this guard must not release it.
        std::mem::forget(self);
        PageReadGuard { latch, base }
    }

    /// Consumes the guard, acquires the frame's exclusive latch, and
    /// returns a write guard carrying the same pin.
    pub async fn upgrade_write(self) -> PageWriteGuard<'a, S, R> {
        let latch = self.pool.frames[self.frame_id.as_usize()].data.write().await;
        let base = PageGuard {
            pool: self.pool,
            frame_id: self.frame_id,
            page_id: self.page_id,
            // A write guard implies the page is dirtied.
            is_dirty: true,
        };
        std::mem::forget(self);
        PageWriteGuard { latch, base }
    }
}

impl<'a, S: Storage, R: Replacer> Drop for PageGuard<'a, S, R> {
    fn drop(&mut self) {
        self.pool.unpin_frame(self.frame_id, self.is_dirty);
    }
}

/// A pinned page under the frame's shared latch.
///
/// Multiple read guards on the same frame may coexist; a read guard and a
/// write guard never do.
pub struct PageReadGuard<'a, S: Storage, R: Replacer> {
    // Declared before `base`: the latch is released before the pin.
    pub(super) latch: RwLockReadGuard<'a, PageBuf>,
    pub(super) base: PageGuard<'a, S, R>,
}

impl<'a, S: Storage, R: Replacer> PageReadGuard<'a, S, R> {
    /// Returns the id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }
}

impl<'a, S: Storage, R: Replacer> Deref for PageReadGuard<'a, S, R> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.latch.as_slice()
    }
}

impl<'a, S: Storage, R: Replacer> AsRef<[u8]> for PageReadGuard<'a, S, R> {
    fn as_ref(&self) -> &[u8] {
        self.latch.as_slice()
    }
}

/// A pinned page under the frame's exclusive latch.
///
/// Dropping the guard releases the latch, marks the page dirty, and
/// unpins it.
pub struct PageWriteGuard<'a, S: Storage, R: Replacer> {
    // Declared before `base`: the latch is released before the pin.
    pub(super) latch: RwLockWriteGuard<'a, PageBuf>,
    pub(super) base: PageGuard<'a, S, R>,
}

impl<'a, S: Storage, R: Replacer> PageWriteGuard<'a, S, R> {
    /// Returns the id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }
}

impl<'a, S: Storage, R: Replacer> Deref for PageWriteGuard<'a, S, R> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.latch.as_slice()
    }
}

impl<'a, S: Storage, R: Replacer> DerefMut for PageWriteGuard<'a, S, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.latch.as_mut_slice()
    }
}

impl<'a, S: Storage, R: Replacer> AsRef<[u8]> for PageWriteGuard<'a, S, R> {
    fn as_ref(&self) -> &[u8] {
        self.latch.as_slice()
    }
}

impl<'a, S: Storage, R: Replacer> AsMut<[u8]> for PageWriteGuard<'a, S, R> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.latch.as_mut_slice()
    }
}
