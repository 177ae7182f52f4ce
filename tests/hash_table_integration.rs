//! Integration tests for the disk extendible hash table.

use std::sync::Arc;

use granite::index::{
    DefaultKeyHasher, DiskExtendibleHashTable, HashTableOptions, IdentityHasher,
};
use granite::storage::{BufferPool, FileStorage, LruKReplacer, MemoryStorage};
use tempfile::TempDir;

type MemPool = BufferPool<MemoryStorage, LruKReplacer>;

fn memory_pool(frames: usize) -> Arc<MemPool> {
    Arc::new(BufferPool::new(
        MemoryStorage::new(),
        LruKReplacer::new(frames, 2),
        frames,
    ))
}

async fn identity_table(
    pool: Arc<MemPool>,
    header_max_depth: u32,
    directory_max_depth: u32,
    bucket_max_size: u16,
) -> DiskExtendibleHashTable<u32, u64, MemoryStorage, LruKReplacer, IdentityHasher> {
    DiskExtendibleHashTable::new(
        pool,
        IdentityHasher,
        HashTableOptions {
            header_max_depth,
            directory_max_depth,
            bucket_max_size,
        },
    )
    .await
    .unwrap()
}

/// Every key of a no-duplicate insert sequence up to
/// `bucket_max_size * 2^directory_max_depth` stays retrievable.
#[tokio::test]
async fn test_full_capacity_retrievability() {
    let table = identity_table(memory_pool(64), 0, 3, 4).await;

    // Keys 0..32 spread 4 keys onto each of the 8 deepest slots, which is
    // exactly the capacity bound.
    for key in 0u32..32 {
        assert!(table.insert(&key, &(key as u64 * 3)).await.unwrap(), "insert {}", key);
    }
    table.verify_integrity().await.unwrap();

    for key in 0u32..32 {
        assert_eq!(table.get(&key).await.unwrap(), Some(key as u64 * 3), "get {}", key);
    }

    // The directory reached full depth along the way.
    assert_eq!(table.directory_global_depth(0).await.unwrap(), Some(3));
}

/// Balanced insert/remove cycles return the directory to depth 0 and
/// leave no bucket pages behind in the pool.
#[tokio::test]
async fn test_balanced_workload_returns_to_depth_zero() {
    let pool = memory_pool(64);
    let table = identity_table(Arc::clone(&pool), 0, 3, 2).await;

    for key in 0u32..16 {
        assert!(table.insert(&key, &(key as u64)).await.unwrap());
    }
    assert_eq!(table.directory_global_depth(0).await.unwrap(), Some(3));

    for key in 0u32..16 {
        assert!(table.remove(&key).await.unwrap(), "remove {}", key);
    }
    for key in 0u32..16 {
        assert_eq!(table.get(&key).await.unwrap(), None);
    }

    assert_eq!(table.directory_global_depth(0).await.unwrap(), Some(0));
    // header + directory + one (empty) bucket
    assert_eq!(pool.page_count(), 3);
    table.verify_integrity().await.unwrap();
}

/// Interleaved inserts and removes with re-insertion of removed keys.
#[tokio::test]
async fn test_interleaved_insert_remove() {
    let table = identity_table(memory_pool(64), 0, 4, 2).await;

    for key in 0u32..24 {
        assert!(table.insert(&key, &(key as u64)).await.unwrap());
    }
    // Remove the even keys.
    for key in (0u32..24).step_by(2) {
        assert!(table.remove(&key).await.unwrap());
    }
    table.verify_integrity().await.unwrap();

    for key in 0u32..24 {
        let expected = if key % 2 == 0 { None } else { Some(key as u64) };
        assert_eq!(table.get(&key).await.unwrap(), expected, "key {}", key);
    }

    // Re-insert with new values.
    for key in (0u32..24).step_by(2) {
        assert!(table.insert(&key, &(key as u64 + 1000)).await.unwrap());
    }
    for key in (0u32..24).step_by(2) {
        assert_eq!(table.get(&key).await.unwrap(), Some(key as u64 + 1000));
    }
    table.verify_integrity().await.unwrap();
}

/// The index works unchanged over file storage and a pool smaller than
/// its page set, exercising eviction under the hash pages.
#[tokio::test]
async fn test_hash_table_over_file_storage_with_tiny_pool() {
    let dir: TempDir = tempfile::tempdir().unwrap();
    let storage = FileStorage::open(dir.path().join("index.db")).await.unwrap();
    // 8 frames: header + directory + a handful of buckets do not fit.
    let pool = Arc::new(BufferPool::new(storage, LruKReplacer::new(8, 2), 8));

    let table: DiskExtendibleHashTable<u64, u64, _, _> = DiskExtendibleHashTable::new(
        Arc::clone(&pool),
        DefaultKeyHasher,
        HashTableOptions {
            header_max_depth: 1,
            directory_max_depth: 6,
            bucket_max_size: 8,
        },
    )
    .await
    .unwrap();

    for key in 0u64..128 {
        assert!(table.insert(&key, &(key * 13)).await.unwrap(), "insert {}", key);
    }
    table.verify_integrity().await.unwrap();

    for key in 0u64..128 {
        assert_eq!(table.get(&key).await.unwrap(), Some(key * 13), "get {}", key);
    }

    for key in (0u64..128).step_by(3) {
        assert!(table.remove(&key).await.unwrap());
    }
    for key in 0u64..128 {
        let expected = if key % 3 == 0 { None } else { Some(key * 13) };
        assert_eq!(table.get(&key).await.unwrap(), expected);
    }
    table.verify_integrity().await.unwrap();
}

/// Values are whatever fixed-width type the caller picks; byte-array keys
/// work the same as integers.
#[tokio::test]
async fn test_byte_array_keys() {
    let pool = memory_pool(64);
    let table: DiskExtendibleHashTable<[u8; 8], u32, _, _> = DiskExtendibleHashTable::new(
        pool,
        DefaultKeyHasher,
        HashTableOptions {
            header_max_depth: 0,
            directory_max_depth: 4,
            bucket_max_size: 16,
        },
    )
    .await
    .unwrap();

    for i in 0u32..64 {
        let key = (i as u64).to_be_bytes();
        assert!(table.insert(&key, &i).await.unwrap());
    }
    for i in 0u32..64 {
        let key = (i as u64).to_be_bytes();
        assert_eq!(table.get(&key).await.unwrap(), Some(i));
    }
}

/// Two tables over one pool stay independent.
#[tokio::test]
async fn test_two_tables_share_a_pool() {
    let pool = memory_pool(64);
    let a = identity_table(Arc::clone(&pool), 0, 3, 4).await;
    let b = identity_table(Arc::clone(&pool), 0, 3, 4).await;

    for key in 0u32..8 {
        assert!(a.insert(&key, &1).await.unwrap());
        assert!(b.insert(&key, &2).await.unwrap());
    }
    for key in 0u32..8 {
        assert_eq!(a.get(&key).await.unwrap(), Some(1));
        assert_eq!(b.get(&key).await.unwrap(), Some(2));
    }
    assert_ne!(a.header_page_id(), b.header_page_id());
}
