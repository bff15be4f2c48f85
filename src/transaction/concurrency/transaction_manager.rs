use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;
use thiserror::Error;

use crate::common::rwlatch::RwLatch;
use crate::common::types::{TxnId, INVALID_LSN};
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState, WType,
};
use crate::transaction::wal::{LogManager, LogManagerError, LogRecordType};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} not found")]
    NotFound(TxnId),

    #[error("WAL error: {0}")]
    LogError(#[from] LogManagerError),
}

/// Registry of live transactions. Shared between the transaction manager
/// (which registers and retires transactions) and the lock manager (which
/// looks up wound-wait victims by id).
pub struct TransactionRegistry {
    transactions: RwLock<HashMap<TxnId, Arc<Transaction>>>,
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            transactions: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.transactions.read().get(&txn_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.transactions.read().len()
    }

    fn insert(&self, txn: Arc<Transaction>) {
        self.transactions.write().insert(txn.id(), txn);
    }

    fn remove(&self, txn_id: TxnId) {
        self.transactions.write().remove(&txn_id);
    }
}

/// Transaction manager - creates transactions and drives commit and abort.
///
/// Commit performs the deferred physical deletes; abort undoes the table and
/// index write sets in reverse order. Both then release every lock through
/// the lock manager. The global latch is held shared for the lifetime of
/// every transaction so that `block_all_transactions` can quiesce the system
/// by taking it exclusively.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    registry: Arc<TransactionRegistry>,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
    global_txn_latch: RwLatch,
}

impl TransactionManager {
    pub fn new(log_manager: Option<Arc<LogManager>>) -> Self {
        let registry = Arc::new(TransactionRegistry::new());
        let lock_manager = Arc::new(LockManager::new(registry.clone()));
        Self {
            next_txn_id: AtomicU64::new(1),
            registry,
            lock_manager,
            log_manager,
            global_txn_latch: RwLatch::new(),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.registry.get(txn_id)
    }

    /// Begin a new transaction. Ids are assigned in increasing order, so a
    /// smaller id always marks an older transaction for wound-wait.
    pub fn begin(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<Arc<Transaction>, TransactionError> {
        self.global_txn_latch.r_lock();

        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        if let Some(log_manager) = &self.log_manager {
            match log_manager.append_record(txn_id, INVALID_LSN, LogRecordType::Begin) {
                Ok(lsn) => {
                    txn.set_first_lsn(lsn);
                    txn.set_last_lsn(lsn);
                }
                Err(e) => {
                    self.global_txn_latch.r_unlock();
                    return Err(e.into());
                }
            }
        }

        self.registry.insert(txn.clone());
        debug!("began txn {} ({:?})", txn_id, isolation_level);
        Ok(txn)
    }

    /// Commit a transaction: apply the deferred deletes, then release locks
    /// and retire the transaction.
    pub fn commit(&self, txn: &Transaction) -> Result<(), TransactionError> {
        txn.set_state(TransactionState::Committed);

        // MarkDelete only tombstoned the rows; the physical deletes happen
        // now. Inserts and updates are already in place.
        let mut write_set = txn.take_table_write_set();
        while let Some(record) = write_set.pop_back() {
            if record.wtype == WType::Delete {
                record.table.apply_delete(record.rid, txn);
            }
        }
        txn.take_index_write_set();

        let log_result = self.append_lifecycle_record(txn, LogRecordType::Commit);
        self.finish(txn);
        debug!("committed txn {}", txn.id());
        log_result
    }

    /// Abort a transaction: undo both write sets back to front, then release
    /// locks and retire the transaction. Safe to call in any state.
    pub fn abort(&self, txn: &Transaction) -> Result<(), TransactionError> {
        txn.set_state(TransactionState::Aborted);

        let mut table_write_set = txn.take_table_write_set();
        while let Some(record) = table_write_set.pop_back() {
            match record.wtype {
                WType::Insert => record.table.apply_delete(record.rid, txn),
                WType::Delete => record.table.rollback_delete(record.rid, txn),
                WType::Update => {
                    record.table.update_tuple(&record.tuple, record.rid, txn);
                }
            }
        }

        let mut index_write_set = txn.take_index_write_set();
        while let Some(record) = index_write_set.pop_back() {
            match record.wtype {
                WType::Insert => record.index.delete_entry(&record.tuple, record.rid, txn),
                WType::Delete => record.index.insert_entry(&record.tuple, record.rid, txn),
                WType::Update => {
                    record.index.delete_entry(&record.tuple, record.rid, txn);
                    if let Some(old_tuple) = &record.old_tuple {
                        record.index.insert_entry(old_tuple, record.rid, txn);
                    }
                }
            }
        }

        let log_result = self.append_lifecycle_record(txn, LogRecordType::Abort);
        self.finish(txn);
        debug!("aborted txn {}", txn.id());
        log_result
    }

    /// Commit by id, for callers that track transactions by their handle id.
    pub fn commit_transaction(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .registry
            .get(txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;
        self.commit(&txn)
    }

    /// Abort by id.
    pub fn abort_transaction(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .registry
            .get(txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;
        self.abort(&txn)
    }

    /// Take the global latch exclusively: no transaction can begin, commit,
    /// or abort until `resume_transactions`.
    pub fn block_all_transactions(&self) {
        self.global_txn_latch.w_lock();
    }

    pub fn resume_transactions(&self) {
        self.global_txn_latch.w_unlock();
    }

    fn append_lifecycle_record(
        &self,
        txn: &Transaction,
        record_type: LogRecordType,
    ) -> Result<(), TransactionError> {
        if let Some(log_manager) = &self.log_manager {
            let lsn = log_manager.append_record(txn.id(), txn.last_lsn(), record_type)?;
            txn.set_last_lsn(lsn);
        }
        Ok(())
    }

    /// Release locks, retire the transaction, and drop the shared hold on
    /// the global latch. Queue entries are removed before the registry entry
    /// so wound-wait never sees a dangling id.
    fn finish(&self, txn: &Transaction) {
        self.lock_manager.release_locks(txn);
        self.registry.remove(txn.id());
        self.global_txn_latch.r_unlock();
    }
}
