use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
    #[error("Header page cannot register any more block pages")]
    HeaderFull,
}

/// Result type for hash table operations
pub type Result<T> = std::result::Result<T, HashTableError>;
