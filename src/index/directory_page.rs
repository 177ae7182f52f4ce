//! Hash table directory page.
//!
//! A directory routes the low `global_depth` bits of a hash to a bucket
//! page. Each slot also records the bucket's local depth, the number of
//! bits that actually distinguish that bucket from its neighbours.
//!
//! Layout (little-endian):
//!
//! ```text
//! +---------------------+ offset 0
//! | max_depth: u32      |
//! +---------------------+ offset 4
//! | global_depth: u32   |
//! +---------------------+ offset 8
//! | local_depths: [u8]  |  DIRECTORY_ARRAY_SIZE entries
//! +---------------------+ offset 8 + 512
//! | bucket_page_ids     |  i32 each, DIRECTORY_ARRAY_SIZE entries
//! +---------------------+
//! ```
//!
//! Invariants (checked by [`HashDirectoryPage::verify_integrity`]):
//! - `ld[i] ≤ gd` for every live slot;
//! - slots pointing at the same bucket share one local depth and are
//!   exactly the slots congruent to each other mod `2^ld`;
//! - `gd` may shrink only while every `ld[i] < gd`.

use std::collections::HashMap;

use crate::storage::{PAGE_SIZE, PageId};

/// Upper bound on a directory page's depth (`2^9` slots fit in one 4KB
/// page together with their local depths).
pub const DIRECTORY_MAX_DEPTH_LIMIT: u32 = 9;

/// Fixed slot-array capacity; offsets do not depend on the runtime depth.
const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH_LIMIT;

const MAX_DEPTH_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// View over a directory page's bytes.
pub struct HashDirectoryPage<T> {
    data: T,
}

impl<T: AsRef<[u8]>> HashDirectoryPage<T> {
    /// Creates a view over the given page bytes.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not exactly `PAGE_SIZE` bytes.
    pub fn new(data: T) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE, "directory page must be page-sized");
        Self { data }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Maximum depth this directory may grow to.
    pub fn max_depth(&self) -> u32 {
        u32::from_le_bytes(self.bytes()[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4].try_into().unwrap())
    }

    /// Current global depth.
    pub fn global_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.bytes()[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4].try_into().unwrap(),
        )
    }

    /// Number of live slots (`2^global_depth`).
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    /// Bucket slot for a hash: its low `global_depth` bits.
    pub fn bucket_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.size() - 1)
    }

    /// Bucket page id stored at `idx`.
    pub fn bucket_page_id(&self, idx: usize) -> PageId {
        assert!(idx < self.size(), "bucket slot {} out of range", idx);
        let offset = BUCKET_IDS_OFFSET + idx * 4;
        PageId::new(i32::from_le_bytes(self.bytes()[offset..offset + 4].try_into().unwrap()))
    }

    /// Local depth of the bucket at `idx`.
    pub fn local_depth(&self, idx: usize) -> u32 {
        assert!(idx < self.size(), "bucket slot {} out of range", idx);
        self.bytes()[LOCAL_DEPTHS_OFFSET + idx] as u32
    }

    /// Mask selecting the `local_depth(idx)` low hash bits.
    pub fn local_depth_mask(&self, idx: usize) -> u32 {
        (1u32 << self.local_depth(idx)) - 1
    }

    /// The companion slot obtained by flipping bit `local_depth - 1` of
    /// `idx`.
    ///
    /// # Panics
    ///
    /// Panics if the slot's local depth is zero (a depth-0 bucket has no
    /// split image).
    pub fn split_image_index(&self, idx: usize) -> usize {
        let depth = self.local_depth(idx);
        assert!(depth > 0, "split image of a depth-0 bucket");
        idx ^ (1 << (depth - 1))
    }

    /// True while the directory can halve: every local depth is strictly
    /// below the global depth.
    pub fn can_shrink(&self) -> bool {
        if self.global_depth() == 0 {
            return false;
        }
        (0..self.size()).all(|idx| self.local_depth(idx) < self.global_depth())
    }

    /// Checks the directory invariants, panicking on any violation.
    ///
    /// Intended for tests and debugging.
    pub fn verify_integrity(&self) {
        let gd = self.global_depth();
        // bucket page id -> (local depth, slot count)
        let mut buckets: HashMap<PageId, (u32, usize)> = HashMap::new();

        for idx in 0..self.size() {
            let ld = self.local_depth(idx);
            assert!(
                ld <= gd,
                "slot {}: local depth {} exceeds global depth {}",
                idx,
                ld,
                gd
            );

            let page_id = self.bucket_page_id(idx);
            if !page_id.is_valid() {
                continue;
            }
            let entry = buckets.entry(page_id).or_insert((ld, 0));
            assert_eq!(
                entry.0, ld,
                "bucket {:?}: inconsistent local depths {} and {}",
                page_id, entry.0, ld
            );
            entry.1 += 1;
        }

        for (page_id, (ld, count)) in buckets {
            assert_eq!(
                count,
                1 << (gd - ld),
                "bucket {:?} at local depth {} referenced by {} slots",
                page_id,
                ld,
                count
            );
        }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> HashDirectoryPage<T> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Initializes an empty directory: global depth 0, one slot with no
    /// bucket.
    ///
    /// # Panics
    ///
    /// Panics if `max_depth` exceeds [`DIRECTORY_MAX_DEPTH_LIMIT`].
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= DIRECTORY_MAX_DEPTH_LIMIT,
            "directory max depth {} exceeds limit {}",
            max_depth,
            DIRECTORY_MAX_DEPTH_LIMIT
        );
        self.bytes_mut()[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4]
            .copy_from_slice(&max_depth.to_le_bytes());
        self.bytes_mut()[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&0u32.to_le_bytes());
        for idx in 0..DIRECTORY_ARRAY_SIZE {
            self.bytes_mut()[LOCAL_DEPTHS_OFFSET + idx] = 0;
            let offset = BUCKET_IDS_OFFSET + idx * 4;
            self.bytes_mut()[offset..offset + 4]
                .copy_from_slice(&PageId::INVALID.page_num().to_le_bytes());
        }
    }

    /// Points slot `idx` at the given bucket page.
    pub fn set_bucket_page_id(&mut self, idx: usize, page_id: PageId) {
        assert!(idx < self.size(), "bucket slot {} out of range", idx);
        let offset = BUCKET_IDS_OFFSET + idx * 4;
        self.bytes_mut()[offset..offset + 4]
            .copy_from_slice(&page_id.page_num().to_le_bytes());
    }

    /// Sets the local depth of slot `idx`.
    pub fn set_local_depth(&mut self, idx: usize, depth: u32) {
        assert!(idx < self.size(), "bucket slot {} out of range", idx);
        assert!(
            depth <= self.global_depth(),
            "local depth {} above global depth {}",
            depth,
            self.global_depth()
        );
        self.bytes_mut()[LOCAL_DEPTHS_OFFSET + idx] = depth as u8;
    }

    /// Doubles the directory: the upper half of the slot array inherits
    /// pointers and local depths slot-by-slot from the lower half.
    ///
    /// # Panics
    ///
    /// Panics at `max_depth`.
    pub fn incr_global_depth(&mut self) {
        let gd = self.global_depth();
        assert!(gd < self.max_depth(), "directory already at max depth {}", gd);

        let size = self.size();
        for idx in 0..size {
            let depth = self.bytes()[LOCAL_DEPTHS_OFFSET + idx];
            let id_offset = BUCKET_IDS_OFFSET + idx * 4;
            let page_id: [u8; 4] = self.bytes()[id_offset..id_offset + 4].try_into().unwrap();

            let mirror = idx + size;
            self.bytes_mut()[LOCAL_DEPTHS_OFFSET + mirror] = depth;
            let mirror_offset = BUCKET_IDS_OFFSET + mirror * 4;
            self.bytes_mut()[mirror_offset..mirror_offset + 4].copy_from_slice(&page_id);
        }

        self.bytes_mut()[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&(gd + 1).to_le_bytes());
    }

    /// Halves the directory.
    ///
    /// # Panics
    ///
    /// Panics at depth 0. Callers check [`HashDirectoryPage::can_shrink`]
    /// first.
    pub fn decr_global_depth(&mut self) {
        let gd = self.global_depth();
        assert!(gd > 0, "directory already at depth 0");
        self.bytes_mut()[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&(gd - 1).to_le_bytes());
    }
}
