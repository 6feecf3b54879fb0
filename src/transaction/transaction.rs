use crate::common::types::{Lsn, TxnId, INVALID_LSN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    Committed,
    Aborted,
}

/// A minimal transaction handle: an identifier plus the LSN chain tail.
/// The core reads the ID for log records and threads the handle through
/// index operations; concurrency control lives above this tier.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    prev_lsn: Lsn,
    state: TransactionState,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            prev_lsn: INVALID_LSN,
            state: TransactionState::Running,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    /// Record the LSN of the latest log record this transaction appended
    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }
}
