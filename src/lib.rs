//! granite: the storage core of an educational relational database engine.
//!
//! The crate implements the storage core of such an engine:
//!
//! - [`storage`]: page-based I/O. A [`storage::Storage`] backend trait with
//!   file and in-memory implementations, a FIFO [`storage::DiskScheduler`]
//!   running I/O on a background worker, and the buffer pool
//!   ([`storage::BufferPool`]) with an LRU-K replacement policy and
//!   RAII page guards.
//! - [`index`]: a disk-resident extendible hash table built on top of the
//!   buffer pool, with a header, directory, bucket page layout and
//!   dynamic bucket splitting and merging.
//!
//! Higher layers of a database (executors, catalog, SQL front end) are
//! deliberately absent; they would consume the page-guard abstraction
//! exposed by the buffer pool.

pub mod index;
pub mod storage;
