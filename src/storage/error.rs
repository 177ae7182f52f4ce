//! Storage layer errors.

use crate::storage::PageId;

/// Errors from the storage backends.
#[derive(Debug)]
pub enum StorageError {
    /// A negative (sentinel) page id was passed to a read or write.
    InvalidPageId(PageId),

    /// Buffer passed to `read_page` or `write_page` is not page-sized.
    InvalidBufferSize {
        /// Expected buffer size (`PAGE_SIZE`).
        expected: usize,
        /// Actual buffer size provided.
        actual: usize,
    },

    /// I/O error from the underlying file system.
    Io(std::io::Error),

    /// The storage file has an invalid format or size.
    Corrupted(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::InvalidPageId(id) => write!(f, "invalid page id: {:?}", id),
            StorageError::InvalidBufferSize { expected, actual } => {
                write!(f, "invalid buffer size: expected {}, got {}", expected, actual)
            }
            StorageError::Io(e) => write!(f, "I/O error: {}", e),
            StorageError::Corrupted(msg) => write!(f, "data corruption: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}
