//! File-backed storage implementation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File as TokioFile, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::Storage;
use crate::storage::error::StorageError;
use crate::storage::page::{PAGE_SIZE, PageId};

/// File-backed storage: pages stored as contiguous 4KB blocks in one file.
///
/// # File layout
///
/// ```text
/// +------------------+------------------+------------------+
/// | Page 0 (4KB)     | Page 1 (4KB)     | Page 2 (4KB)     | ...
/// +------------------+------------------+------------------+
/// ^ offset 0         ^ offset 4096      ^ offset 8192
/// ```
///
/// # Concurrency
///
/// A `tokio::sync::Mutex` around the file handle serializes seeks and
/// transfers. The high-water mark of written bytes is tracked separately so
/// reads past the end can zero-fill without touching the file.
///
/// # Durability
///
/// `sync_all` forwards to `File::sync_all`; without it, data may sit in OS
/// buffers when the process crashes.
pub struct FileStorage {
    /// Path to the storage file.
    path: PathBuf,
    /// File handle, serialized behind an async mutex.
    file: Mutex<TokioFile>,
    /// High-water mark of written bytes (always a multiple of PAGE_SIZE).
    len: AtomicU64,
}

impl FileStorage {
    /// Opens or creates a storage file at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupted` if an existing file's size is not
    /// a multiple of `PAGE_SIZE`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let file_size = file.metadata().await?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(StorageError::Corrupted(format!(
                "file size {} is not a multiple of page size {}",
                file_size, PAGE_SIZE
            )));
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            len: AtomicU64::new(file_size),
        })
    }

    /// Returns the path to the storage file.
    pub fn path(&self) -> &Path {
        &self.path
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

impl Storage for FileStorage {
    async fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), StorageError> {
        Self::check_args(page_id, buf.len())?;

        let offset = page_id.byte_offset();
        let len = self.len.load(Ordering::Acquire);

        if offset >= len {
            // Never written: zero-fill.
            buf.fill(0);
            return Ok(());
        }

        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.read_exact(buf).await?;
        Ok(())
    }

    async fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), StorageError> {
        Self::check_args(page_id, buf.len())?;

        let offset = page_id.byte_offset();

        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(buf).await?;
        file.flush().await?;

        self.len.fetch_max(offset + PAGE_SIZE as u64, Ordering::Release);
        Ok(())
    }

    async fn page_count(&self) -> u64 {
        self.len.load(Ordering::Acquire) / PAGE_SIZE as u64
    }

    async fn sync_all(&self) -> Result<(), StorageError> {
        let file = self.file.lock().await;
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("test.db")).await.unwrap();
        assert_eq!(storage.page_count().await, 0);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("test.db")).await.unwrap();

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[PAGE_SIZE - 1] = 7;
        storage.write_page(PageId::new(3), &write_buf).await.unwrap();

        let mut read_buf = vec![0u8; PAGE_SIZE];
        storage.read_page(PageId::new(3), &mut read_buf).await.unwrap();
        assert_eq!(read_buf, write_buf);

        // Writing page 3 extends the file to 4 pages.
        assert_eq!(storage.page_count().await, 4);
    }

    #[tokio::test]
    async fn test_read_unwritten_page_zero_fills() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("test.db")).await.unwrap();

        let mut buf = vec![0xffu8; PAGE_SIZE];
        storage.read_page(PageId::new(10), &mut buf).await.unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("test.db")).await.unwrap();

        let mut short = vec![0u8; 16];
        assert!(matches!(
            storage.read_page(PageId::new(0), &mut short).await,
            Err(StorageError::InvalidBufferSize { .. })
        ));

        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            storage.read_page(PageId::INVALID, &mut buf).await,
            Err(StorageError::InvalidPageId(_))
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_misaligned_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.db");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        assert!(matches!(
            FileStorage::open(&path).await,
            Err(StorageError::Corrupted(_))
        ));
    }
}
