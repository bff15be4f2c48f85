pub mod concurrency;
pub mod wal;

pub use concurrency::{
    IsolationLevel, LockManager, Transaction, TransactionManager, TransactionState,
};
pub use wal::{LogManager, LogRecord, LogRecordType};
