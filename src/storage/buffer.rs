//! Buffer pool for page caching.
//!
//! The buffer pool keeps a fixed number of frames in memory, maps logical
//! pages into them on demand, and evicts victims chosen by an LRU-K
//! replacement policy. Access goes through RAII guards that pin the page
//! for their lifetime and (for the typed variants) hold the frame's
//! reader-writer latch.
//!
//! # Example
//!
//! ```no_run
//! use granite::storage::{BufferPool, LruKReplacer, MemoryStorage};
//!
//! # async fn example() {
//! let pool = BufferPool::new(MemoryStorage::new(), LruKReplacer::new(64, 2), 64);
//!
//! // Allocate a page and write into it.
//! let guard = pool.new_page().await.unwrap();
//! let page_id = guard.page_id();
//! let mut guard = guard.upgrade_write().await;
//! guard[..5].copy_from_slice(b"hello");
//! drop(guard); // releases the latch, marks dirty, unpins
//!
//! // Read it back.
//! let guard = pool.fetch_page_read(page_id).await.unwrap();
//! assert_eq!(&guard[..5], b"hello");
//! # }
//! ```

mod error;
mod frame;
mod guard;
mod pool;
mod replacer;

pub use error::BufferPoolError;
pub use frame::FrameId;
pub use guard::{PageGuard, PageReadGuard, PageWriteGuard};
pub use pool::BufferPool;
pub use replacer::{LruKReplacer, Replacer};
