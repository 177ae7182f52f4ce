//! Storage backend trait and its implementations.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::storage::error::StorageError;
use crate::storage::page::PageId;

/// Storage backend trait for page-based I/O.
///
/// The trait covers raw page transfer only; it does not interpret page
/// contents, does not cache, and does not allocate page ids (the buffer
/// pool owns the id counter and the recycled-id list).
///
/// # Reads of never-written pages
///
/// Reading a page that has never been written zero-fills the caller's
/// buffer and succeeds. The buffer pool hands out freshly allocated pages
/// as zeroed memory without touching the backend, so a clean new page that
/// is evicted and fetched again must still read back as zeroes; the
/// backend cannot distinguish "unallocated" from "allocated, never
/// written".
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; the disk scheduler drives them
/// from a background task while callers block on completions.
pub trait Storage: Send + Sync {
    /// Reads a page into the caller-provided buffer.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidPageId` for the invalid sentinel.
    /// - `StorageError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    /// - `StorageError::Io` if the underlying device call fails.
    fn read_page(
        &self,
        page_id: PageId,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Writes a page from the caller-provided buffer.
    ///
    /// Writing past the current end of the backing store extends it.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidPageId` for the invalid sentinel.
    /// - `StorageError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    /// - `StorageError::Io` if the underlying device call fails.
    fn write_page(
        &self,
        page_id: PageId,
        buf: &[u8],
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Number of pages the backing store currently spans.
    fn page_count(&self) -> impl std::future::Future<Output = u64> + Send;

    /// Syncs all pending writes to the physical device (fsync).
    ///
    /// A no-op for in-memory storage.
    fn sync_all(&self) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;
}
