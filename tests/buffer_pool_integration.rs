//! Integration tests for the buffer pool over file storage.

use granite::storage::{
    BufferPool, BufferPoolError, FileStorage, LruKReplacer, MemoryStorage, PAGE_SIZE, PageId,
};
use tempfile::TempDir;

async fn file_pool(dir: &TempDir, pool_size: usize) -> BufferPool<FileStorage, LruKReplacer> {
    let storage = FileStorage::open(dir.path().join("granite.db"))
        .await
        .expect("failed to open storage");
    BufferPool::new(storage, LruKReplacer::new(pool_size, 2), pool_size)
}

fn memory_pool(pool_size: usize) -> BufferPool<MemoryStorage, LruKReplacer> {
    BufferPool::new(
        MemoryStorage::new(),
        LruKReplacer::new(pool_size, 2),
        pool_size,
    )
}

/// Pool of three frames: pin three pages, release one, and the fourth
/// allocation must evict exactly the released page.
#[tokio::test]
async fn test_eviction_picks_the_unpinned_page() {
    let pool = memory_pool(3);

    let g0 = pool.new_page().await.unwrap();
    let g1 = pool.new_page().await.unwrap();
    let g2 = pool.new_page().await.unwrap();
    let p1 = g1.page_id();

    // All frames pinned: allocation fails.
    assert!(matches!(
        pool.new_page().await,
        Err(BufferPoolError::NoFreeFrames)
    ));

    drop(g1);
    let g3 = pool.new_page().await.unwrap();

    assert_eq!(pool.pin_count(p1), None, "p1 must have been evicted");
    assert_eq!(pool.pin_count(g0.page_id()), Some(1));
    assert_eq!(pool.pin_count(g2.page_id()), Some(1));
    assert_eq!(pool.pin_count(g3.page_id()), Some(1));
}

/// A dirty page forced out by eviction must be written back; fetching it
/// again reads the persisted bytes.
#[tokio::test]
async fn test_dirty_victim_written_back_before_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir, 2).await;

    let page_id = {
        let guard = pool.new_page().await.unwrap();
        let page_id = guard.page_id();
        let mut guard = guard.upgrade_write().await;
        guard[0..8].copy_from_slice(b"persist!");
        page_id
    };

    // Cycle enough pages through the pool to evict the dirty page.
    for _ in 0..3 {
        let guard = pool.new_page().await.unwrap();
        drop(guard);
    }
    assert_eq!(pool.pin_count(page_id), None);

    let guard = pool.fetch_page_read(page_id).await.unwrap();
    assert_eq!(&guard[0..8], b"persist!");
}

/// flush_all + drop + reopen: a second pool over the same file sees all
/// the bytes the first one wrote.
#[tokio::test]
async fn test_flush_all_survives_pool_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut page_ids = Vec::new();

    {
        let pool = file_pool(&dir, 8).await;
        for i in 0u8..5 {
            let guard = pool.new_page().await.unwrap();
            page_ids.push(guard.page_id());
            let mut guard = guard.upgrade_write().await;
            guard.fill(i + 1);
        }
        pool.flush_all().await.unwrap();
    }

    let pool = file_pool(&dir, 8).await;
    for (i, &page_id) in page_ids.iter().enumerate() {
        let guard = pool.fetch_page_read(page_id).await.unwrap();
        assert!(
            guard.iter().all(|&b| b == i as u8 + 1),
            "page {:?} lost its contents",
            page_id
        );
    }
}

/// After flush_page, re-reading the same page id from the backend
/// observes the written bytes even though the page stays resident.
#[tokio::test]
async fn test_flush_page_makes_bytes_durable() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir, 4).await;

    let guard = pool.new_page().await.unwrap();
    let page_id = guard.page_id();
    {
        let mut guard = guard.upgrade_write().await;
        guard[100] = 0x5a;
    }

    assert!(pool.flush_page(page_id).await.unwrap());
    assert_eq!(pool.is_dirty(page_id), Some(false));

    // A second pool over the same file reads the flushed bytes.
    let other = file_pool(&dir, 4).await;
    let guard = other.fetch_page_read(page_id).await.unwrap();
    assert_eq!(guard[100], 0x5a);
}

/// Pin counts return to their pre-fetch value when guards drop, across
/// every guard flavour.
#[tokio::test]
async fn test_guard_pin_accounting() {
    let pool = memory_pool(4);
    let guard = pool.new_page().await.unwrap();
    let page_id = guard.page_id();
    drop(guard);
    assert_eq!(pool.pin_count(page_id), Some(0));

    let basic = pool.fetch_page(page_id).await.unwrap();
    assert_eq!(pool.pin_count(page_id), Some(1));
    let read = basic.upgrade_read().await;
    assert_eq!(pool.pin_count(page_id), Some(1));
    drop(read);
    assert_eq!(pool.pin_count(page_id), Some(0));

    let write = pool.fetch_page_write(page_id).await.unwrap();
    assert_eq!(pool.pin_count(page_id), Some(1));
    drop(write);
    assert_eq!(pool.pin_count(page_id), Some(0));
}

/// Deleted pages free their frame and recycle their id.
#[tokio::test]
async fn test_delete_returns_frame_and_recycles_id() {
    let pool = memory_pool(2);

    let g0 = pool.new_page().await.unwrap();
    let p0 = g0.page_id();
    let _g1 = pool.new_page().await.unwrap();
    drop(g0);

    assert!(pool.delete_page(p0));
    assert_eq!(pool.page_count(), 1);

    // The freed frame and the recycled id are both reused.
    let g2 = pool.new_page().await.unwrap();
    assert_eq!(g2.page_id(), p0);
    assert_eq!(pool.page_count(), 2);
}

/// Many pages cycled through a small pool: every page still reads back
/// with the bytes last written to it.
#[tokio::test]
async fn test_working_set_larger_than_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir, 4).await;

    let mut page_ids = Vec::new();
    for i in 0u8..32 {
        let guard = pool.new_page().await.unwrap();
        page_ids.push(guard.page_id());
        let mut guard = guard.upgrade_write().await;
        guard.fill(i);
    }

    for (i, &page_id) in page_ids.iter().enumerate() {
        let guard = pool.fetch_page_read(page_id).await.unwrap();
        assert!(
            guard.iter().all(|&b| b == i as u8),
            "page {:?} corrupted after eviction cycles",
            page_id
        );
    }
    assert_eq!(pool.page_count(), 4);
}

/// Multiple tasks hammering disjoint pages through a pool smaller than
/// the working set.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disjoint_writers() {
    use std::sync::Arc;

    let pool = Arc::new(memory_pool(8));

    // Pre-allocate one page per worker.
    let mut page_ids = Vec::new();
    for _ in 0..16 {
        let guard = pool.new_page().await.unwrap();
        page_ids.push(guard.page_id());
    }

    let mut handles = Vec::new();
    for (worker, &page_id) in page_ids.iter().enumerate() {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            for round in 0..50u32 {
                let mut guard = pool.fetch_page_write(page_id).await.unwrap();
                let value = (worker as u32).wrapping_mul(31).wrapping_add(round);
                guard[0..4].copy_from_slice(&value.to_le_bytes());
                drop(guard);
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for (worker, &page_id) in page_ids.iter().enumerate() {
        let guard = pool.fetch_page_read(page_id).await.unwrap();
        let value = u32::from_le_bytes(guard[0..4].try_into().unwrap());
        assert_eq!(value, (worker as u32).wrapping_mul(31).wrapping_add(49));
    }
}

/// Page contents are page-sized and zeroed on allocation.
#[tokio::test]
async fn test_new_page_is_zeroed() {
    let pool = memory_pool(2);
    let guard = pool.new_page().await.unwrap().upgrade_read().await;
    assert_eq!(guard.len(), PAGE_SIZE);
    assert!(guard.iter().all(|&b| b == 0));
}

/// unpin_page reports misuse instead of corrupting the pin count.
#[tokio::test]
async fn test_unpin_misuse_is_reported() {
    let pool = memory_pool(2);
    assert!(!pool.unpin_page(PageId::new(0), false));

    let guard = pool.new_page().await.unwrap();
    let page_id = guard.page_id();
    drop(guard);
    assert!(!pool.unpin_page(page_id, false));
    assert_eq!(pool.pin_count(page_id), Some(0));
}
