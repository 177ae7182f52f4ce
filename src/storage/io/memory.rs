//! In-memory page storage for testing and development.

use std::collections::HashMap;
use std::sync::Mutex;

use super::Storage;
use crate::storage::error::StorageError;
use crate::storage::page::{PAGE_SIZE, PageId};

/// In-memory page storage.
///
/// Pages are kept in a map keyed by `PageId`, so sparse and recycled ids
/// work the same way they do for [`super::FileStorage`]. Reads of pages
/// that were never written zero-fill the buffer.
pub struct MemoryStorage {
    pages: Mutex<HashMap<PageId, Box<[u8]>>>,
}

impl MemoryStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn check_args(page_id: PageId, buf_len: usize) -> Result<(), StorageError> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }
        if buf_len != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf_len,
            });
        }
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    async fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), StorageError> {
        Self::check_args(page_id, buf.len())?;

        let pages = self.pages.lock().expect("memory storage lock poisoned");
        match pages.get(&page_id) {
            Some(page) => buf.copy_from_slice(page),
            None => buf.fill(0),
        }
        Ok(())
    }

    async fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), StorageError> {
        Self::check_args(page_id, buf.len())?;

        let mut pages = self.pages.lock().expect("memory storage lock poisoned");
        pages.insert(page_id, buf.to_vec().into_boxed_slice());
        Ok(())
    }

    async fn page_count(&self) -> u64 {
        self.pages.lock().expect("memory storage lock poisoned").len() as u64
    }

    async fn sync_all(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
