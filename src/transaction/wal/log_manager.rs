use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_record::LogRecord;

/// Default capacity of each of the two log buffers
pub const LOG_BUFFER_SIZE: usize = 32 * 1024;

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("Log record of {0} bytes exceeds the log buffer capacity")]
    RecordTooLarge(usize),
}

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Capacity of each log buffer in bytes
    pub buffer_size: usize,
    /// How long the flusher sleeps between group commits
    pub log_timeout: Duration,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            buffer_size: LOG_BUFFER_SIZE,
            log_timeout: Duration::from_millis(40),
        }
    }
}

/// The two log buffers and their fill offsets. Appenders write into
/// `log_buffer`; the flusher swaps it with `flush_buffer` and drains that
/// to disk.
struct LogBuffers {
    log_buffer: Vec<u8>,
    log_offset: usize,
    flush_buffer: Vec<u8>,
    flush_offset: usize,
}

/// Assigns LSNs, serializes log records into a double-buffered in-memory
/// log, and persists them asynchronously via a group-commit flusher task.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    buffers: Mutex<LogBuffers>,
    flush_cv: Condvar,
    next_lsn: AtomicI32,
    persistent_lsn: AtomicI32,
    enable_logging: AtomicBool,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    config: LogManagerConfig,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self::with_config(disk_manager, LogManagerConfig::default())
    }

    pub fn with_config(disk_manager: Arc<DiskManager>, config: LogManagerConfig) -> Self {
        Self {
            disk_manager,
            buffers: Mutex::new(LogBuffers {
                log_buffer: vec![0; config.buffer_size],
                log_offset: 0,
                flush_buffer: vec![0; config.buffer_size],
                flush_offset: 0,
            }),
            flush_cv: Condvar::new(),
            next_lsn: AtomicI32::new(0),
            persistent_lsn: AtomicI32::new(INVALID_LSN),
            enable_logging: AtomicBool::new(false),
            flush_thread: Mutex::new(None),
            config,
        }
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.enable_logging.load(Ordering::SeqCst)
    }

    /// Largest LSN whose record is durable on the log device
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// The LSN the next appended record will receive
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Nudge the flusher to run a group commit ahead of its timeout
    pub fn wake_flusher(&self) {
        self.flush_cv.notify_one();
    }

    /// Start the flusher task and enable logging. Idempotent.
    pub fn run_flush_thread(self: &Arc<Self>) {
        let mut handle = self.flush_thread.lock();
        if handle.is_some() {
            return;
        }
        self.enable_logging.store(true, Ordering::SeqCst);
        let manager = Arc::clone(self);
        *handle = Some(std::thread::spawn(move || manager.flush_loop()));
        debug!("log flusher started");
    }

    /// Disable logging and join the flusher, draining buffered records
    pub fn stop_flush_thread(&self) {
        let handle = {
            let mut guard = self.flush_thread.lock();
            guard.take()
        };
        if let Some(handle) = handle {
            self.enable_logging.store(false, Ordering::SeqCst);
            self.flush_cv.notify_one();
            if handle.join().is_err() {
                error!("log flusher panicked");
            }
            debug!("log flusher stopped, persistent_lsn={}", self.persistent_lsn());
        }
    }

    /// Append a record to the in-memory log, assigning its LSN. Blocks
    /// (yielding) while the active buffer is too full to hold the record.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Result<Lsn, LogManagerError> {
        let size = record.size();
        if size > self.config.buffer_size {
            return Err(LogManagerError::RecordTooLarge(size));
        }

        let mut buffers = self.buffers.lock();
        while buffers.log_offset + size > self.config.buffer_size {
            drop(buffers);
            self.flush_cv.notify_one();
            std::thread::yield_now();
            buffers = self.buffers.lock();
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        record.lsn = lsn;
        let offset = buffers.log_offset;
        record.serialize_into(&mut buffers.log_buffer[offset..offset + size]);
        buffers.log_offset += size;
        Ok(lsn)
    }

    /// Flusher body: wait for work (or the timeout), swap the buffers under
    /// the latch, then drain the flush buffer to disk and publish the new
    /// persistent LSN.
    fn flush_loop(&self) {
        while self.is_logging_enabled() {
            self.flush_once();
        }
        // Drain anything appended during the final cycle
        self.flush_once();
    }

    fn flush_once(&self) {
        let (data, len, candidate) = {
            let mut buffers = self.buffers.lock();
            if self.is_logging_enabled() {
                let _ = self.flush_cv.wait_for(&mut buffers, self.config.log_timeout);
            }
            let candidate = self.next_lsn.load(Ordering::SeqCst) - 1;
            let buffers = &mut *buffers;
            std::mem::swap(&mut buffers.log_buffer, &mut buffers.flush_buffer);
            std::mem::swap(&mut buffers.log_offset, &mut buffers.flush_offset);
            let len = buffers.flush_offset;
            (std::mem::take(&mut buffers.flush_buffer), len, candidate)
        };

        if len > 0 {
            if let Err(e) = self.disk_manager.write_log(&data[..len]) {
                error!("failed to write log buffer: {}", e);
            }
        }

        {
            let mut buffers = self.buffers.lock();
            buffers.flush_buffer = data;
            buffers.flush_offset = 0;
        }

        if candidate > self.persistent_lsn() {
            self.persistent_lsn.store(candidate, Ordering::SeqCst);
        }
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.stop_flush_thread();
    }
}
