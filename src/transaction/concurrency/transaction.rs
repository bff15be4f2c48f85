use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TxnId, INVALID_LSN};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Kind of modification recorded in a write set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WType {
    Insert,
    Delete,
    Update,
}

/// An opaque serialized row image. The core never interprets its bytes; it
/// only carries them between the write sets and the table/index callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tuple(Vec<u8>);

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn data(&self) -> &[u8] {
        &self.0
    }
}

/// The slice of a table heap the transaction manager needs for undo:
/// physical delete, tombstone rollback, and in-place tuple replacement.
pub trait TableHeap: Send + Sync {
    fn apply_delete(&self, rid: Rid, txn: &Transaction);
    fn rollback_delete(&self, rid: Rid, txn: &Transaction);
    fn update_tuple(&self, tuple: &Tuple, rid: Rid, txn: &Transaction) -> bool;
}

/// The slice of an index the transaction manager needs for undo. The key is
/// derived from the tuple by the index itself.
pub trait TableIndex: Send + Sync {
    fn insert_entry(&self, tuple: &Tuple, rid: Rid, txn: &Transaction);
    fn delete_entry(&self, tuple: &Tuple, rid: Rid, txn: &Transaction);
}

/// One table modification awaiting commit or undo. For `Delete` and `Update`
/// the tuple carries the pre-image.
pub struct TableWriteRecord {
    pub rid: Rid,
    pub wtype: WType,
    pub tuple: Tuple,
    pub table: Arc<dyn TableHeap>,
}

/// One index modification awaiting undo. For `Update`, `tuple` is the new
/// image and `old_tuple` the pre-image whose key must be restored.
pub struct IndexWriteRecord {
    pub rid: Rid,
    pub wtype: WType,
    pub tuple: Tuple,
    pub old_tuple: Option<Tuple>,
    pub index: Arc<dyn TableIndex>,
}

/// Reasons the lock manager refuses or revokes a lock
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while shrinking")]
    LockOnShrinking,
    #[error("shared lock requested under READ_UNCOMMITTED")]
    SharedOnReadUncommitted,
    #[error("deadlock prevention chose this transaction as victim")]
    Deadlock,
    #[error("another transaction is already upgrading this lock")]
    UpgradeConflict,
}

/// Raised by executors when a lock request fails; the query driver reacts by
/// calling `TransactionManager::abort`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// An active database transaction.
///
/// All fields the lock manager touches concurrently (state, lock sets) sit
/// behind their own locks, because wound-wait aborts a transaction from
/// another thread.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    first_lsn: AtomicU64,
    last_lsn: AtomicU64,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    table_write_set: Mutex<VecDeque<TableWriteRecord>>,
    index_write_set: Mutex<VecDeque<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            first_lsn: AtomicU64::new(INVALID_LSN),
            last_lsn: AtomicU64::new(INVALID_LSN),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            table_write_set: Mutex::new(VecDeque::new()),
            index_write_set: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn first_lsn(&self) -> Lsn {
        self.first_lsn.load(Ordering::SeqCst)
    }

    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn.load(Ordering::SeqCst)
    }

    pub fn set_first_lsn(&self, lsn: Lsn) {
        self.first_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn set_last_lsn(&self, lsn: Lsn) {
        self.last_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn shared_locks(&self) -> HashSet<Rid> {
        self.shared_lock_set.lock().clone()
    }

    pub fn exclusive_locks(&self) -> HashSet<Rid> {
        self.exclusive_lock_set.lock().clone()
    }

    pub(crate) fn insert_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn insert_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Record a table modification for commit/undo processing.
    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.table_write_set.lock().push_back(record);
    }

    /// Record an index modification for undo processing.
    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push_back(record);
    }

    pub fn table_write_count(&self) -> usize {
        self.table_write_set.lock().len()
    }

    pub fn index_write_count(&self) -> usize {
        self.index_write_set.lock().len()
    }

    pub(crate) fn take_table_write_set(&self) -> VecDeque<TableWriteRecord> {
        std::mem::take(&mut *self.table_write_set.lock())
    }

    pub(crate) fn take_index_write_set(&self) -> VecDeque<IndexWriteRecord> {
        std::mem::take(&mut *self.index_write_set.lock())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation_level", &self.isolation_level)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
        assert_eq!(txn.first_lsn(), INVALID_LSN);
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        let rid = Rid::new(1, 3);

        txn.insert_shared_lock(rid);
        assert!(txn.is_shared_locked(rid));
        assert!(!txn.is_exclusive_locked(rid));

        txn.remove_shared_lock(rid);
        txn.insert_exclusive_lock(rid);
        assert!(!txn.is_shared_locked(rid));
        assert!(txn.is_exclusive_locked(rid));
    }

    #[test]
    fn test_write_sets_preserve_order() {
        struct NoopTable;
        impl TableHeap for NoopTable {
            fn apply_delete(&self, _rid: Rid, _txn: &Transaction) {}
            fn rollback_delete(&self, _rid: Rid, _txn: &Transaction) {}
            fn update_tuple(&self, _tuple: &Tuple, _rid: Rid, _txn: &Transaction) -> bool {
                true
            }
        }

        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        let table: Arc<dyn TableHeap> = Arc::new(NoopTable);
        for slot in 0..3 {
            txn.append_table_write(TableWriteRecord {
                rid: Rid::new(1, slot),
                wtype: WType::Insert,
                tuple: Tuple::default(),
                table: table.clone(),
            });
        }

        let records = txn.take_table_write_set();
        let slots: Vec<u32> = records.iter().map(|r| r.rid.slot_num).collect();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(txn.table_write_count(), 0);
    }
}
