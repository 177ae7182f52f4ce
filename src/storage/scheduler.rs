//! FIFO disk scheduler.
//!
//! The scheduler decouples I/O submission from I/O execution: callers
//! enqueue [`DiskRequest`]s and the scheduler processes them strictly in
//! order on a background worker task. Each request carries a oneshot
//! completion that the worker fulfils when the transfer finishes, so
//! callers can submit and then wait synchronously from their point of
//! view.
//!
//! The page buffer travels *with* the request and is handed back through
//! the completion; the scheduler retains nothing once a request is done.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::storage::error::StorageError;
use crate::storage::io::Storage;
use crate::storage::page::{PageBuf, PageId};

/// A single read or write request.
pub struct DiskRequest {
    /// True for a write, false for a read.
    pub is_write: bool,
    /// Page buffer: the bytes to write, or the destination of a read.
    /// Returned to the caller through `done` on completion.
    pub data: PageBuf,
    /// The page being transferred.
    pub page_id: PageId,
    /// Completion handle fulfilled by the worker.
    pub done: CompletionSender,
}

/// Sending half of a request completion.
pub type CompletionSender = oneshot::Sender<Result<PageBuf, StorageError>>;

/// Receiving half of a request completion; await it to block on the I/O.
pub type CompletionReceiver = oneshot::Receiver<Result<PageBuf, StorageError>>;

/// Schedules disk requests onto a background worker, FIFO.
///
/// Dropping the scheduler closes the queue; the worker drains any requests
/// already submitted and then exits.
pub struct DiskScheduler<S: Storage> {
    storage: Arc<S>,
    queue: mpsc::UnboundedSender<DiskRequest>,
}

impl<S: Storage + 'static> DiskScheduler<S> {
    /// Creates a scheduler over the given backend and spawns its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(storage: S) -> Self {
        let storage = Arc::new(storage);
        let (tx, mut rx) = mpsc::unbounded_channel::<DiskRequest>();

        let worker_storage = Arc::clone(&storage);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let DiskRequest {
                    is_write,
                    mut data,
                    page_id,
                    done,
                } = request;

                let result = if is_write {
                    worker_storage.write_page(page_id, data.as_slice()).await
                } else {
                    worker_storage.read_page(page_id, data.as_mut_slice()).await
                };

                // The submitter may have gone away; nothing to do then.
                let _ = done.send(result.map(|()| data));
            }
        });

        Self { storage, queue: tx }
    }

    /// Creates a completion pair for a request.
    pub fn create_promise() -> (CompletionSender, CompletionReceiver) {
        oneshot::channel()
    }

    /// Enqueues a request for processing.
    ///
    /// # Panics
    ///
    /// Panics if the worker task has terminated.
    pub fn schedule(&self, request: DiskRequest) {
        self.queue
            .send(request)
            .unwrap_or_else(|_| panic!("disk scheduler worker terminated"));
    }

    /// Returns the underlying storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}
