use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Buffer pool is full: all frames are pinned")]
    BufferPoolFull,
    #[error("Page {0} not found in buffer pool")]
    PageNotFound(PageId),
    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),
    #[error("Page {0} is pinned")]
    PagePinned(PageId),
    #[error("Disk error: {0}")]
    DiskError(#[from] DiskManagerError),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
