//! Error types for the hash index.

use crate::storage::BufferPoolError;

/// Errors from hash table operations.
///
/// Operational outcomes (key absent, duplicate key, table full at maximum
/// depth) are reported through return values, not errors; this enum covers
/// infrastructure failures bubbling up from the buffer pool.
#[derive(Debug)]
pub enum HashTableError {
    /// Buffer pool failure (pool exhausted, disk I/O error).
    Buffer(BufferPoolError),
}

impl std::fmt::Display for HashTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashTableError::Buffer(e) => write!(f, "buffer pool error: {}", e),
        }
    }
}

impl std::error::Error for HashTableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HashTableError::Buffer(e) => Some(e),
        }
    }
}

impl From<BufferPoolError> for HashTableError {
    fn from(e: BufferPoolError) -> Self {
        HashTableError::Buffer(e)
    }
}
