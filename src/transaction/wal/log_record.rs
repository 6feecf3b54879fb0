use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, Rid, Tuple, TxnId, INVALID_LSN};

/// Fixed header: size | lsn | txn_id | prev_lsn | type, 4 bytes each
pub const HEADER_SIZE: usize = 20;

/// Types of log records, in on-disk tag order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Invalid,
            1 => Self::Insert,
            2 => Self::MarkDelete,
            3 => Self::ApplyDelete,
            4 => Self::RollbackDelete,
            5 => Self::Update,
            6 => Self::Begin,
            7 => Self::Commit,
            8 => Self::Abort,
            9 => Self::NewPage,
            _ => return None,
        })
    }
}

/// Variant-specific payload of a log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    Insert { rid: Rid, tuple: Tuple },
    MarkDelete { rid: Rid, tuple: Tuple },
    ApplyDelete { rid: Rid, tuple: Tuple },
    RollbackDelete { rid: Rid, tuple: Tuple },
    Update { rid: Rid, old_tuple: Tuple, new_tuple: Tuple },
    NewPage { prev_page_id: PageId, page_id: PageId },
}

impl LogPayload {
    fn record_type(&self) -> LogRecordType {
        match self {
            Self::Begin => LogRecordType::Begin,
            Self::Commit => LogRecordType::Commit,
            Self::Abort => LogRecordType::Abort,
            Self::Insert { .. } => LogRecordType::Insert,
            Self::MarkDelete { .. } => LogRecordType::MarkDelete,
            Self::ApplyDelete { .. } => LogRecordType::ApplyDelete,
            Self::RollbackDelete { .. } => LogRecordType::RollbackDelete,
            Self::Update { .. } => LogRecordType::Update,
            Self::NewPage { .. } => LogRecordType::NewPage,
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            Self::Begin | Self::Commit | Self::Abort => 0,
            Self::Insert { tuple, .. }
            | Self::MarkDelete { tuple, .. }
            | Self::ApplyDelete { tuple, .. }
            | Self::RollbackDelete { tuple, .. } => RID_SIZE + 4 + tuple.len(),
            Self::Update { old_tuple, new_tuple, .. } => {
                RID_SIZE + 4 + old_tuple.len() + 4 + new_tuple.len()
            }
            Self::NewPage { .. } => 8,
        }
    }
}

const RID_SIZE: usize = 8;

/// One write-ahead log record. The LSN is assigned by the log manager at
/// append time; records are constructed with `INVALID_LSN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new(txn_id: TxnId, prev_lsn: Lsn, payload: LogPayload) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogPayload::Begin)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Commit)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Abort)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Insert { rid, tuple })
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::MarkDelete { rid, tuple })
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::ApplyDelete { rid, tuple })
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::RollbackDelete { rid, tuple })
    }

    pub fn new_update(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, old_tuple: Tuple, new_tuple: Tuple) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::Update { rid, old_tuple, new_tuple })
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self::new(txn_id, prev_lsn, LogPayload::NewPage { prev_page_id, page_id })
    }

    pub fn record_type(&self) -> LogRecordType {
        self.payload.record_type()
    }

    /// Total serialized size, header included
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.encoded_size()
    }

    /// Serialize into `buf`, which must hold at least `self.size()` bytes.
    /// Returns the number of bytes written.
    pub fn serialize_into(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_i32(&mut buf[0..4], self.size() as i32);
        LittleEndian::write_i32(&mut buf[4..8], self.lsn);
        LittleEndian::write_u32(&mut buf[8..12], self.txn_id);
        LittleEndian::write_i32(&mut buf[12..16], self.prev_lsn);
        LittleEndian::write_i32(&mut buf[16..20], self.record_type() as i32);

        let mut pos = HEADER_SIZE;
        match &self.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => {}
            LogPayload::Insert { rid, tuple }
            | LogPayload::MarkDelete { rid, tuple }
            | LogPayload::ApplyDelete { rid, tuple }
            | LogPayload::RollbackDelete { rid, tuple } => {
                pos = write_rid(buf, pos, rid);
                pos = write_tuple(buf, pos, tuple);
            }
            LogPayload::Update { rid, old_tuple, new_tuple } => {
                pos = write_rid(buf, pos, rid);
                pos = write_tuple(buf, pos, old_tuple);
                pos = write_tuple(buf, pos, new_tuple);
            }
            LogPayload::NewPage { prev_page_id, page_id } => {
                LittleEndian::write_u32(&mut buf[pos..pos + 4], *prev_page_id);
                LittleEndian::write_u32(&mut buf[pos + 4..pos + 8], *page_id);
                pos += 8;
            }
        }
        pos
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        self.serialize_into(&mut buf);
        buf
    }

    /// Deserialize a record from the front of `buf`. Returns None when the
    /// bytes are truncated or malformed, which recovery treats as the end
    /// of the usable log.
    pub fn deserialize(buf: &[u8]) -> Option<LogRecord> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let size = LittleEndian::read_i32(&buf[0..4]);
        if size < HEADER_SIZE as i32 || size as usize > buf.len() {
            return None;
        }
        let lsn = LittleEndian::read_i32(&buf[4..8]);
        let txn_id = LittleEndian::read_u32(&buf[8..12]);
        let prev_lsn = LittleEndian::read_i32(&buf[12..16]);
        let record_type = LogRecordType::from_i32(LittleEndian::read_i32(&buf[16..20]))?;

        let body = &buf[HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Invalid => return None,
            LogRecordType::Begin => LogPayload::Begin,
            LogRecordType::Commit => LogPayload::Commit,
            LogRecordType::Abort => LogPayload::Abort,
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let (rid, pos) = read_rid(body, 0)?;
                let (tuple, _) = read_tuple(body, pos)?;
                match record_type {
                    LogRecordType::Insert => LogPayload::Insert { rid, tuple },
                    LogRecordType::MarkDelete => LogPayload::MarkDelete { rid, tuple },
                    LogRecordType::ApplyDelete => LogPayload::ApplyDelete { rid, tuple },
                    _ => LogPayload::RollbackDelete { rid, tuple },
                }
            }
            LogRecordType::Update => {
                let (rid, pos) = read_rid(body, 0)?;
                let (old_tuple, pos) = read_tuple(body, pos)?;
                let (new_tuple, _) = read_tuple(body, pos)?;
                LogPayload::Update { rid, old_tuple, new_tuple }
            }
            LogRecordType::NewPage => {
                if body.len() < 8 {
                    return None;
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_u32(&body[0..4]),
                    page_id: LittleEndian::read_u32(&body[4..8]),
                }
            }
        };

        Some(LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            payload,
        })
    }
}

fn write_rid(buf: &mut [u8], pos: usize, rid: &Rid) -> usize {
    LittleEndian::write_u32(&mut buf[pos..pos + 4], rid.page_id);
    LittleEndian::write_u32(&mut buf[pos + 4..pos + 8], rid.slot);
    pos + RID_SIZE
}

fn write_tuple(buf: &mut [u8], pos: usize, tuple: &Tuple) -> usize {
    LittleEndian::write_u32(&mut buf[pos..pos + 4], tuple.len() as u32);
    buf[pos + 4..pos + 4 + tuple.len()].copy_from_slice(tuple.as_bytes());
    pos + 4 + tuple.len()
}

fn read_rid(buf: &[u8], pos: usize) -> Option<(Rid, usize)> {
    if buf.len() < pos + RID_SIZE {
        return None;
    }
    let page_id = LittleEndian::read_u32(&buf[pos..pos + 4]);
    let slot = LittleEndian::read_u32(&buf[pos + 4..pos + 8]);
    Some((Rid::new(page_id, slot), pos + RID_SIZE))
}

fn read_tuple(buf: &[u8], pos: usize) -> Option<(Tuple, usize)> {
    if buf.len() < pos + 4 {
        return None;
    }
    let len = LittleEndian::read_u32(&buf[pos..pos + 4]) as usize;
    let start = pos + 4;
    if buf.len() < start + len {
        return None;
    }
    Some((Tuple::from(&buf[start..start + len]), start + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(mut record: LogRecord) {
        record.lsn = 42;
        let bytes = record.serialize();
        assert_eq!(bytes.len(), record.size());
        let decoded = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_control_records_round_trip() {
        round_trip(LogRecord::new_begin(1));
        round_trip(LogRecord::new_commit(1, 5));
        round_trip(LogRecord::new_abort(2, 9));
    }

    #[test]
    fn test_data_records_round_trip() {
        let rid = Rid::new(3, 7);
        let tuple = Tuple::new(b"payload".to_vec());
        round_trip(LogRecord::new_insert(1, 0, rid, tuple.clone()));
        round_trip(LogRecord::new_mark_delete(1, 1, rid, tuple.clone()));
        round_trip(LogRecord::new_apply_delete(1, 2, rid, tuple.clone()));
        round_trip(LogRecord::new_rollback_delete(1, 3, rid, tuple.clone()));
        round_trip(LogRecord::new_update(
            1,
            4,
            rid,
            tuple,
            Tuple::new(b"new payload".to_vec()),
        ));
    }

    #[test]
    fn test_new_page_round_trip() {
        round_trip(LogRecord::new_new_page(1, INVALID_LSN, 0, 12));
    }

    #[test]
    fn test_header_layout() {
        let mut record = LogRecord::new_commit(7, 3);
        record.lsn = 11;
        let bytes = record.serialize();
        assert_eq!(LittleEndian::read_i32(&bytes[0..4]), HEADER_SIZE as i32);
        assert_eq!(LittleEndian::read_i32(&bytes[4..8]), 11);
        assert_eq!(LittleEndian::read_u32(&bytes[8..12]), 7);
        assert_eq!(LittleEndian::read_i32(&bytes[12..16]), 3);
        assert_eq!(LittleEndian::read_i32(&bytes[16..20]), LogRecordType::Commit as i32);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let mut record = LogRecord::new_insert(1, 0, Rid::new(2, 0), Tuple::new(vec![1, 2, 3]));
        record.lsn = 0;
        let bytes = record.serialize();

        assert!(LogRecord::deserialize(&bytes[..HEADER_SIZE - 1]).is_none());
        assert!(LogRecord::deserialize(&bytes[..bytes.len() - 1]).is_none());
    }

    #[test]
    fn test_garbage_type_is_rejected() {
        let mut bytes = LogRecord::new_begin(1).serialize();
        LittleEndian::write_i32(&mut bytes[16..20], 99);
        assert!(LogRecord::deserialize(&bytes).is_none());
    }
}
