use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use siltdb::storage::buffer::BufferPoolManager;
use siltdb::storage::disk::DiskManager;
use siltdb::transaction::wal::log_manager::{LogManager, LogManagerConfig};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a disk manager, log manager, and WAL-gated buffer pool over the
// same temporary device
#[allow(dead_code)]
pub fn create_wal_buffer_pool(
    pool_size: usize,
    config: LogManagerConfig,
) -> Result<(Arc<DiskManager>, Arc<LogManager>, Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let log_manager = Arc::new(LogManager::with_config(disk_manager.clone(), config));
    let buffer_pool = Arc::new(BufferPoolManager::new_with_wal(
        pool_size,
        disk_manager.clone(),
        log_manager.clone(),
    ));
    Ok((disk_manager, log_manager, buffer_pool, file))
}
