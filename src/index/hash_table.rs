//! Disk-resident extendible hash table.

use std::marker::PhantomData;
use std::sync::Arc;

use super::bucket_page::HashBucketPage;
use super::codec::EncodeFixed;
use super::directory_page::HashDirectoryPage;
use super::error::HashTableError;
use super::hasher::{DefaultKeyHasher, KeyHasher};
use super::header_page::HashHeaderPage;
use crate::storage::{BufferPool, PageId, Replacer, Storage};

/// Construction-time parameters of a hash table. All fixed for the life
/// of the index.
#[derive(Debug, Clone, Copy)]
pub struct HashTableOptions {
    /// Hash bits used by the header to pick a directory.
    pub header_max_depth: u32,
    /// Upper bound on every directory's global depth.
    pub directory_max_depth: u32,
    /// Entries per bucket page.
    pub bucket_max_size: u16,
}

impl Default for HashTableOptions {
    fn default() -> Self {
        Self {
            header_max_depth: 2,
            directory_max_depth: 9,
            bucket_max_size: 128,
        }
    }
}

/// A disk-resident extendible hash table over the buffer pool.
///
/// The table stores exactly one value per key; duplicate inserts are
/// rejected. Concurrency follows latch crabbing over page guards: parents
/// are released once the child is latched, except that structural changes
/// (bucket split and merge) keep the directory's exclusive latch so
/// pointers and local depths stay consistent.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use granite::index::{DiskExtendibleHashTable, DefaultKeyHasher, HashTableOptions};
/// use granite::storage::{BufferPool, LruKReplacer, MemoryStorage};
///
/// # async fn example() {
/// let pool = Arc::new(BufferPool::new(
///     MemoryStorage::new(),
///     LruKReplacer::new(64, 2),
///     64,
/// ));
/// let table: DiskExtendibleHashTable<u64, u64, _, _> =
///     DiskExtendibleHashTable::new(pool, DefaultKeyHasher, HashTableOptions::default())
///         .await
///         .unwrap();
///
/// assert!(table.insert(&1, &100).await.unwrap());
/// assert_eq!(table.get(&1).await.unwrap(), Some(100));
/// assert!(table.remove(&1).await.unwrap());
/// # }
/// ```
pub struct DiskExtendibleHashTable<K, V, S: Storage, R: Replacer, H = DefaultKeyHasher> {
    pool: Arc<BufferPool<S, R>>,
    hasher: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u16,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S, R, H> DiskExtendibleHashTable<K, V, S, R, H>
where
    K: EncodeFixed + Eq,
    V: EncodeFixed,
    S: Storage + 'static,
    R: Replacer,
    H: KeyHasher<K>,
{
    /// Creates a new hash table, allocating its header page.
    ///
    /// # Panics
    ///
    /// Panics if the options exceed the page-layout limits (header or
    /// directory depth, bucket size vs. page capacity for this key/value
    /// shape).
    pub async fn new(
        pool: Arc<BufferPool<S, R>>,
        hasher: H,
        options: HashTableOptions,
    ) -> Result<Self, HashTableError> {
        assert!(options.bucket_max_size > 0, "bucket max size must be positive");
        assert!(
            (options.bucket_max_size as usize) <= HashBucketPage::<Vec<u8>, K, V>::capacity(),
            "bucket max size {} exceeds page capacity {}",
            options.bucket_max_size,
            HashBucketPage::<Vec<u8>, K, V>::capacity()
        );
        assert!(
            options.header_max_depth <= super::header_page::HEADER_MAX_DEPTH_LIMIT,
            "header max depth {} exceeds limit",
            options.header_max_depth
        );
        assert!(
            options.directory_max_depth <= super::directory_page::DIRECTORY_MAX_DEPTH_LIMIT,
            "directory max depth {} exceeds limit",
            options.directory_max_depth
        );

        let guard = pool.new_page().await?;
        let header_page_id = guard.page_id();
        let mut header = HashHeaderPage::new(guard.upgrade_write().await);
        header.init(options.header_max_depth);
        drop(header);

        Ok(Self {
            pool,
            hasher,
            header_page_id,
            directory_max_depth: options.directory_max_depth,
            bucket_max_size: options.bucket_max_size,
            _marker: PhantomData,
        })
    }

    /// Returns the id of the table's header page.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up the value stored for `key`.
    pub async fn get(&self, key: &K) -> Result<Option<V>, HashTableError> {
        let hash = self.hasher.hash_key(key);

        let header = HashHeaderPage::new(self.pool.fetch_page_read(self.header_page_id).await?);
        let directory_page_id = header.directory_page_id(header.directory_index(hash));
        drop(header);
        if !directory_page_id.is_valid() {
            return Ok(None);
        }

        let directory =
            HashDirectoryPage::new(self.pool.fetch_page_read(directory_page_id).await?);
        let bucket_page_id = directory.bucket_page_id(directory.bucket_index(hash));
        if !bucket_page_id.is_valid() {
            return Ok(None);
        }

        // The directory latch is held until the bucket latch is acquired,
        // so a concurrent merge cannot pull the bucket out from under us.
        let bucket: HashBucketPage<_, K, V> =
            HashBucketPage::new(self.pool.fetch_page_read(bucket_page_id).await?);
        drop(directory);

        Ok(bucket.lookup(key))
    }

    /// Inserts a key/value pair.
    ///
    /// Returns `Ok(false)` when the key is already present, or when the
    /// bucket chain cannot be split any further (the directory is at its
    /// maximum depth and every colliding key hashes to the same slot).
    pub async fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let hash = self.hasher.hash_key(key);

        let mut header =
            HashHeaderPage::new(self.pool.fetch_page_write(self.header_page_id).await?);
        let directory_idx = header.directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);

        if !directory_page_id.is_valid() {
            return self
                .insert_to_new_directory(&mut header, directory_idx, hash, key, value)
                .await;
        }

        let directory_guard = self.pool.fetch_page_write(directory_page_id).await?;
        drop(header);
        let mut directory = HashDirectoryPage::new(directory_guard);

        let bucket_idx = directory.bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        if !bucket_page_id.is_valid() {
            return self
                .insert_to_new_bucket(&mut directory, bucket_idx, key, value)
                .await;
        }

        let mut bucket_page_id = bucket_page_id;
        let mut bucket: HashBucketPage<_, K, V> =
            HashBucketPage::new(self.pool.fetch_page_write(bucket_page_id).await?);

        // Split until the pair fits. Each round raises the target chain's
        // local depth, so the loop is bounded by the directory max depth.
        loop {
            if bucket.lookup(key).is_some() {
                return Ok(false);
            }
            if bucket.insert(key, value) {
                return Ok(true);
            }

            // Bucket is full. Grow the directory if this bucket already
            // uses every directory bit.
            let bucket_idx = directory.bucket_index(hash);
            if directory.local_depth(bucket_idx) == directory.global_depth() {
                if directory.global_depth() == self.directory_max_depth {
                    return Ok(false);
                }
                directory.incr_global_depth();
            }

            let new_depth = directory.local_depth(bucket_idx) + 1;
            let split_idx = bucket_idx ^ (1 << (new_depth - 1));

            let split_guard = self.pool.new_page().await?;
            let split_page_id = split_guard.page_id();
            let mut split: HashBucketPage<_, K, V> =
                HashBucketPage::new(split_guard.upgrade_write().await);
            split.init(self.bucket_max_size);

            tracing::debug!(
                bucket = bucket_page_id.page_num(),
                sibling = split_page_id.page_num(),
                depth = new_depth,
                "splitting hash bucket"
            );

            // Raise the local depth of every slot that pointed at the old
            // bucket, retargeting the half that now routes to the sibling.
            let mask = (1usize << new_depth) - 1;
            for idx in 0..directory.size() {
                if directory.bucket_page_id(idx) == bucket_page_id {
                    if idx & mask == split_idx & mask {
                        directory.set_bucket_page_id(idx, split_page_id);
                    }
                    directory.set_local_depth(idx, new_depth);
                }
            }

            // Redistribute: re-hash every entry into whichever of the two
            // buckets its slot now points at.
            for (k, v) in bucket.drain() {
                let idx = directory.bucket_index(self.hasher.hash_key(&k));
                let inserted = if directory.bucket_page_id(idx) == split_page_id {
                    split.insert(&k, &v)
                } else {
                    bucket.insert(&k, &v)
                };
                debug_assert!(inserted, "redistribution cannot overflow a fresh split");
            }

            // Continue with whichever side the pending key routes to.
            let target_idx = directory.bucket_index(hash);
            if directory.bucket_page_id(target_idx) == split_page_id {
                bucket = split;
                bucket_page_id = split_page_id;
            }
        }
    }

    /// Removes the pair stored for `key`. Returns `Ok(false)` when the key
    /// is absent.
    ///
    /// After a successful removal, the bucket merges with its split image
    /// while one of the pair is empty and their local depths match, and
    /// the directory shrinks while every local depth is below the global
    /// depth.
    pub async fn remove(&self, key: &K) -> Result<bool, HashTableError> {
        let hash = self.hasher.hash_key(key);

        let header = HashHeaderPage::new(self.pool.fetch_page_read(self.header_page_id).await?);
        let directory_page_id = header.directory_page_id(header.directory_index(hash));
        drop(header);
        if !directory_page_id.is_valid() {
            return Ok(false);
        }

        let mut directory =
            HashDirectoryPage::new(self.pool.fetch_page_write(directory_page_id).await?);

        let mut bucket_idx = directory.bucket_index(hash);
        let mut bucket_page_id = directory.bucket_page_id(bucket_idx);
        if !bucket_page_id.is_valid() {
            return Ok(false);
        }

        let mut bucket: HashBucketPage<_, K, V> =
            HashBucketPage::new(self.pool.fetch_page_write(bucket_page_id).await?);
        if !bucket.remove(key) {
            return Ok(false);
        }

        // Merge with the split image while one side of the pair is empty.
        // The sibling may be the empty one, so the check runs even when
        // this bucket still holds entries.
        while directory.local_depth(bucket_idx) > 0 {
            let depth = directory.local_depth(bucket_idx);
            let split_idx = directory.split_image_index(bucket_idx);
            if directory.local_depth(split_idx) != depth {
                break;
            }
            let split_page_id = directory.bucket_page_id(split_idx);
            if split_page_id == bucket_page_id || !split_page_id.is_valid() {
                break;
            }

            let split: HashBucketPage<_, K, V> =
                HashBucketPage::new(self.pool.fetch_page_write(split_page_id).await?);
            if !bucket.is_empty() && !split.is_empty() {
                break;
            }

            let bucket_is_orphan = bucket.is_empty();
            let (survivor_page_id, orphan_page_id) = if bucket_is_orphan {
                (split_page_id, bucket_page_id)
            } else {
                (bucket_page_id, split_page_id)
            };

            tracing::debug!(
                survivor = survivor_page_id.page_num(),
                orphan = orphan_page_id.page_num(),
                depth = depth - 1,
                "merging hash buckets"
            );

            // Every slot pointing at either half now points at the
            // survivor, one level shallower.
            for idx in 0..directory.size() {
                let page_id = directory.bucket_page_id(idx);
                if page_id == bucket_page_id || page_id == split_page_id {
                    directory.set_bucket_page_id(idx, survivor_page_id);
                    directory.set_local_depth(idx, depth - 1);
                }
            }

            if bucket_is_orphan {
                let orphan = std::mem::replace(&mut bucket, split);
                drop(orphan);
                bucket_idx = split_idx;
                bucket_page_id = split_page_id;
            } else {
                drop(split);
            }

            // The directory latch is still held, so nothing can reach the
            // orphan page: its pin count is zero and deletion succeeds.
            if !self.pool.delete_page(orphan_page_id) {
                tracing::warn!(
                    page_id = orphan_page_id.page_num(),
                    "orphan bucket page still pinned; leaking it"
                );
            }
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
            tracing::trace!(
                global_depth = directory.global_depth(),
                "hash directory shrunk"
            );
        }

        Ok(true)
    }

    /// Allocates a directory (and its first bucket) for a header slot that
    /// had none, then inserts the pair. Called with the header latch held.
    async fn insert_to_new_directory<T>(
        &self,
        header: &mut HashHeaderPage<T>,
        directory_idx: usize,
        hash: u32,
        key: &K,
        value: &V,
    ) -> Result<bool, HashTableError>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        let guard = self.pool.new_page().await?;
        let directory_page_id = guard.page_id();
        let mut directory = HashDirectoryPage::new(guard.upgrade_write().await);
        directory.init(self.directory_max_depth);
        header.set_directory_page_id(directory_idx, directory_page_id);

        let bucket_idx = directory.bucket_index(hash);
        self.insert_to_new_bucket(&mut directory, bucket_idx, key, value).await
    }

    /// Allocates a bucket for a directory slot that had none, then inserts
    /// the pair. Called with the directory latch held.
    async fn insert_to_new_bucket<T>(
        &self,
        directory: &mut HashDirectoryPage<T>,
        bucket_idx: usize,
        key: &K,
        value: &V,
    ) -> Result<bool, HashTableError>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        let guard = self.pool.new_page().await?;
        let bucket_page_id = guard.page_id();
        let mut bucket: HashBucketPage<_, K, V> =
            HashBucketPage::new(guard.upgrade_write().await);
        bucket.init(self.bucket_max_size);
        directory.set_bucket_page_id(bucket_idx, bucket_page_id);

        Ok(bucket.insert(key, value))
    }

    /// Global depth of the directory at the given header slot, or `None`
    /// when that slot has no directory yet.
    pub async fn directory_global_depth(
        &self,
        directory_idx: usize,
    ) -> Result<Option<u32>, HashTableError> {
        let header = HashHeaderPage::new(self.pool.fetch_page_read(self.header_page_id).await?);
        let directory_page_id = header.directory_page_id(directory_idx);
        if !directory_page_id.is_valid() {
            return Ok(None);
        }
        let directory =
            HashDirectoryPage::new(self.pool.fetch_page_read(directory_page_id).await?);
        drop(header);
        Ok(Some(directory.global_depth()))
    }

    /// Runs the directory invariant checks on every live directory,
    /// panicking on a violation. Intended for tests.
    pub async fn verify_integrity(&self) -> Result<(), HashTableError> {
        let header = HashHeaderPage::new(self.pool.fetch_page_read(self.header_page_id).await?);
        for idx in 0..header.max_size() {
            let directory_page_id = header.directory_page_id(idx);
            if !directory_page_id.is_valid() {
                continue;
            }
            let directory =
                HashDirectoryPage::new(self.pool.fetch_page_read(directory_page_id).await?);
            directory.verify_integrity();
        }
        Ok(())
    }
}
