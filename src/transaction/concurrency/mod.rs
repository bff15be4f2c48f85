pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{
    AbortReason, IndexWriteRecord, IsolationLevel, TableHeap, TableIndex, TableWriteRecord,
    Transaction, TransactionAbortError, TransactionState, Tuple, WType,
};
pub use transaction_manager::{TransactionError, TransactionManager, TransactionRegistry};
