//! Buffer pool errors.

use crate::storage::StorageError;

/// Errors from buffer pool operations.
#[derive(Debug)]
pub enum BufferPoolError {
    /// Every frame is pinned; no page can be evicted to make room.
    NoFreeFrames,

    /// Underlying storage I/O error.
    Storage(StorageError),

    /// Internal invariant violation (should not happen in correct usage).
    Internal(String),
}

impl std::fmt::Display for BufferPoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferPoolError::NoFreeFrames => {
                write!(f, "no free frames available and all pages are pinned")
            }
            BufferPoolError::Storage(e) => write!(f, "storage error: {}", e),
            BufferPoolError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for BufferPoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferPoolError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for BufferPoolError {
    fn from(e: StorageError) -> Self {
        BufferPoolError::Storage(e)
    }
}
