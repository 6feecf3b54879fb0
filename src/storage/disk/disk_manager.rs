use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual device I/O: page reads and writes on the
/// database file, and append/sequential-read access to the log file.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicU32,
}

impl DiskManager {
    /// Open (or create) the database file and its companion log file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref();
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let mut log_path = db_path.as_os_str().to_owned();
        log_path.push(".log");
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path)?;

        // First allocatable page is 1; resume the counter from the file size
        let file_size = db_file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            next_page_id: AtomicU32::new(next_page_id),
        })
    }

    /// Read a page from disk
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            // Reading past the end of the file yields a zeroed page
            if offset as u64 >= file_size {
                page.data = [0; PAGE_SIZE];
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = self.page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page on disk and return its ID
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);

        // Extend the file with zeros so the page can be read back immediately
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(self.page_offset(page_id) as u64))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(page_id)
    }

    /// Deallocate a page. Advisory only: the page file is not shrunk and the
    /// ID is not recycled.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Append a buffer of serialized log records to the log file
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes of the log starting at `offset`.
    /// Returns the number of bytes read; 0 means end of log.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = (file_size - offset) as usize;
        let to_read = buf.len().min(available);
        file.read_exact(&mut buf[..to_read])?;

        Ok(to_read)
    }

    fn page_offset(&self, page_id: PageId) -> usize {
        (page_id as usize - 1) * PAGE_SIZE
    }
}
