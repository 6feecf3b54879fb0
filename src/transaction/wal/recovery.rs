use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use log::{debug, info};
use thiserror::Error;

use crate::common::types::{Lsn, TxnId, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::{PageError, TablePage};
use crate::transaction::wal::log_manager::LOG_BUFFER_SIZE;
use crate::transaction::wal::log_record::{LogPayload, LogRecord, HEADER_SIZE};

/// Error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Disk error: {0}")]
    DiskError(#[from] DiskManagerError),
    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
    #[error("Page error: {0}")]
    PageError(#[from] PageError),
    #[error("Log is corrupt at offset {0}")]
    CorruptLog(u64),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// ARIES-simplified crash recovery: one forward redo pass over the whole
/// log, then reverse-chain undo of every transaction without a commit or
/// abort record. Both passes go through the buffer pool with logging off.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    /// Latest LSN seen for each transaction still considered active
    active_txn: HashMap<TxnId, Lsn>,
    /// Byte offset in the log file of every record seen during redo
    lsn_mapping: HashMap<Lsn, u64>,
    log_buffer: Vec<u8>,
    buffer_offset: u64,
    buffer_len: usize,
}

impl LogRecovery {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
            log_buffer: vec![0; LOG_BUFFER_SIZE],
            buffer_offset: 0,
            buffer_len: 0,
        }
    }

    /// Run both recovery passes
    pub fn recover(&mut self) -> Result<()> {
        info!("starting recovery: redo pass");
        self.redo()?;
        info!(
            "redo complete, {} transaction(s) without a commit or abort",
            self.active_txn.len()
        );
        self.undo()?;
        info!("recovery complete");
        Ok(())
    }

    /// Transactions that were alive at the crash, as discovered by redo
    pub fn active_transactions(&self) -> Vec<TxnId> {
        self.active_txn.keys().copied().collect()
    }

    /// Forward pass: scan the log in buffer-sized chunks and reapply every
    /// operation a page has not yet seen (page-LSN < record LSN), building
    /// the active-transaction and LSN-offset tables along the way.
    /// A truncated trailing record ends the scan cleanly.
    pub fn redo(&mut self) -> Result<()> {
        let mut file_offset: u64 = 0;
        loop {
            let n = self.disk_manager.read_log(&mut self.log_buffer, file_offset)?;
            if n == 0 {
                break;
            }
            self.buffer_offset = file_offset;
            self.buffer_len = n;

            let mut pos = 0;
            while let Some(record) = LogRecord::deserialize(&self.log_buffer[pos..n]) {
                self.active_txn.insert(record.txn_id, record.lsn);
                self.lsn_mapping.insert(record.lsn, file_offset + pos as u64);
                pos += record.size();
                self.redo_record(&record)?;
            }
            if pos == 0 {
                break;
            }
            file_offset += pos as u64;
        }
        Ok(())
    }

    fn redo_record(&mut self, record: &LogRecord) -> Result<()> {
        match &record.payload {
            LogPayload::Begin => {}
            LogPayload::Commit | LogPayload::Abort => {
                self.active_txn.remove(&record.txn_id);
            }
            LogPayload::Insert { rid, tuple } => {
                self.redo_on_page(rid.page_id, record.lsn, |data| {
                    TablePage::insert_tuple_at(data, rid.slot, tuple)
                })?;
            }
            LogPayload::MarkDelete { rid, .. } => {
                self.redo_on_page(rid.page_id, record.lsn, |data| {
                    TablePage::mark_delete(data, rid.slot)
                })?;
            }
            LogPayload::ApplyDelete { rid, .. } => {
                self.redo_on_page(rid.page_id, record.lsn, |data| {
                    TablePage::apply_delete(data, rid.slot)
                })?;
            }
            LogPayload::RollbackDelete { rid, .. } => {
                self.redo_on_page(rid.page_id, record.lsn, |data| {
                    TablePage::rollback_delete(data, rid.slot)
                })?;
            }
            LogPayload::Update { rid, new_tuple, .. } => {
                self.redo_on_page(rid.page_id, record.lsn, |data| {
                    TablePage::update_tuple(data, rid.slot, new_tuple)
                })?;
            }
            LogPayload::NewPage { prev_page_id, page_id } => {
                self.redo_new_page(record.lsn, *prev_page_id, *page_id)?;
            }
        }
        Ok(())
    }

    /// Apply `op` to a page if its page-LSN shows the operation missing
    fn redo_on_page<F>(&self, page_id: u32, lsn: Lsn, op: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> std::result::Result<(), PageError>,
    {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let need_redo = {
            let mut page_guard = page.write();
            let need_redo = TablePage::page_lsn(&page_guard.data) < lsn;
            if need_redo {
                op(&mut page_guard.data)?;
                TablePage::set_lsn(&mut page_guard.data, lsn);
            }
            need_redo
        };
        self.buffer_pool.unpin_page(page_id, need_redo)?;
        Ok(())
    }

    fn redo_new_page(&self, lsn: Lsn, prev_page_id: u32, page_id: u32) -> Result<()> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let need_redo = {
            let mut page_guard = page.write();
            let need_redo = TablePage::page_lsn(&page_guard.data) < lsn;
            if need_redo {
                TablePage::init(&mut page_guard.data, page_id, prev_page_id);
                TablePage::set_lsn(&mut page_guard.data, lsn);
            }
            need_redo
        };
        self.buffer_pool.unpin_page(page_id, need_redo)?;

        // Re-link the previous page, guarded by its own page-LSN
        if need_redo && prev_page_id != INVALID_PAGE_ID {
            let prev_page = self.buffer_pool.fetch_page(prev_page_id)?;
            let patched = {
                let mut prev_guard = prev_page.write();
                let patched = TablePage::page_lsn(&prev_guard.data) < lsn;
                if patched {
                    TablePage::set_next_page_id(&mut prev_guard.data, page_id);
                    TablePage::set_lsn(&mut prev_guard.data, lsn);
                }
                patched
            };
            self.buffer_pool.unpin_page(prev_page_id, patched)?;
        }
        Ok(())
    }

    /// Reverse pass: walk the prev-LSN chains of every loser transaction
    /// from newest record to oldest, applying the inverse operation of each.
    pub fn undo(&mut self) -> Result<()> {
        let mut undo_set: BTreeSet<Lsn> = self.active_txn.values().copied().collect();
        debug!("undo pass over {} chain(s)", undo_set.len());

        while let Some(lsn) = undo_set.pop_last() {
            let offset = match self.lsn_mapping.get(&lsn) {
                Some(&offset) => offset,
                None => continue,
            };
            let record = self.load_record_at(offset)?;
            self.undo_record(&record)?;
            if record.prev_lsn != INVALID_LSN {
                undo_set.insert(record.prev_lsn);
            }
        }
        Ok(())
    }

    fn undo_record(&self, record: &LogRecord) -> Result<()> {
        match &record.payload {
            LogPayload::Begin
            | LogPayload::Commit
            | LogPayload::Abort
            | LogPayload::NewPage { .. } => {}
            LogPayload::Insert { rid, .. } => {
                self.undo_on_page(rid.page_id, |data| TablePage::apply_delete(data, rid.slot))?;
            }
            LogPayload::MarkDelete { rid, .. } => {
                self.undo_on_page(rid.page_id, |data| TablePage::rollback_delete(data, rid.slot))?;
            }
            LogPayload::ApplyDelete { rid, tuple } => {
                self.undo_on_page(rid.page_id, |data| {
                    TablePage::insert_tuple_at(data, rid.slot, tuple)
                })?;
            }
            LogPayload::RollbackDelete { rid, .. } => {
                self.undo_on_page(rid.page_id, |data| TablePage::mark_delete(data, rid.slot))?;
            }
            LogPayload::Update { rid, old_tuple, .. } => {
                self.undo_on_page(rid.page_id, |data| {
                    TablePage::update_tuple(data, rid.slot, old_tuple)
                })?;
            }
        }
        Ok(())
    }

    fn undo_on_page<F>(&self, page_id: u32, op: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> std::result::Result<(), PageError>,
    {
        let page = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut page_guard = page.write();
            op(&mut page_guard.data)?;
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Return the record starting at the given log-file offset, reloading
    /// the buffered window when the offset falls outside it
    fn load_record_at(&mut self, offset: u64) -> Result<LogRecord> {
        let in_window = offset >= self.buffer_offset
            && offset + HEADER_SIZE as u64 <= self.buffer_offset + self.buffer_len as u64;
        if !in_window {
            self.load_window(offset)?;
        }

        let start = (offset - self.buffer_offset) as usize;
        if let Some(record) = LogRecord::deserialize(&self.log_buffer[start..self.buffer_len]) {
            return Ok(record);
        }

        // The record may straddle the window boundary; reload at its start
        self.load_window(offset)?;
        LogRecord::deserialize(&self.log_buffer[..self.buffer_len])
            .ok_or(RecoveryError::CorruptLog(offset))
    }

    fn load_window(&mut self, offset: u64) -> Result<()> {
        let n = self.disk_manager.read_log(&mut self.log_buffer, offset)?;
        if n == 0 {
            return Err(RecoveryError::CorruptLog(offset));
        }
        self.buffer_offset = offset;
        self.buffer_len = n;
        Ok(())
    }
}
