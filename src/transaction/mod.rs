pub mod transaction;
pub mod wal;

pub use transaction::{Transaction, TransactionState};
