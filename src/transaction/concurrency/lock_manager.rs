use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionRegistry;

/// Lock modes on a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    /// Transaction currently upgrading shared -> exclusive on this row;
    /// only one upgrade may be in flight at a time.
    upgrading: Option<TxnId>,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            upgrading: None,
        }
    }
}

/// Row-granularity two-phase lock manager with Wound-Wait deadlock
/// prevention.
///
/// Each RID has a queue of requests; at any instant the granted requests are
/// either a prefix of shared requests or a single exclusive request at the
/// head, ignoring entries of wounded transactions. A waiting older
/// transaction wounds every younger conflicting transaction ahead of it, so
/// the wait graph always follows transaction age and cannot cycle.
pub struct LockManager {
    registry: Arc<TransactionRegistry>,
    lock_table: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl LockManager {
    pub fn new(registry: Arc<TransactionRegistry>) -> Self {
        Self {
            registry,
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`. Returns false if the transaction is
    /// aborted (before or while waiting), past its growing phase, or running
    /// READ_UNCOMMITTED, which never takes read locks.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() != TransactionState::Growing
            || txn.isolation_level() == IsolationLevel::ReadUncommitted
        {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_shared_locked(rid) {
            return true;
        }

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_default();
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });
        let cv = queue.cv.clone();
        txn.insert_shared_lock(rid);

        while self.shared_need_wait(txn.id(), &table, rid) {
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return false;
            }
        }

        Self::mark_granted(table.get_mut(&rid).expect("queue exists"), txn.id());
        txn.set_state(TransactionState::Growing);
        true
    }

    /// Acquire an exclusive lock on `rid`.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_default();
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        let cv = queue.cv.clone();
        txn.insert_exclusive_lock(rid);

        while self.exclusive_need_wait(txn.id(), &table, rid) {
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return false;
            }
        }

        Self::mark_granted(table.get_mut(&rid).expect("queue exists"), txn.id());
        txn.set_state(TransactionState::Growing);
        true
    }

    /// Upgrade a held shared lock to exclusive. The upgrade takes priority
    /// over queued requests, but only one upgrade may wait per row; a second
    /// upgrader aborts immediately.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_default();
        if let Some(upgrader) = queue.upgrading {
            if upgrader != txn.id() {
                txn.set_state(TransactionState::Aborted);
                debug!(
                    "txn {} aborted: txn {} is already upgrading {}",
                    txn.id(),
                    upgrader,
                    rid
                );
                return false;
            }
        }
        queue.upgrading = Some(txn.id());
        let cv = queue.cv.clone();

        while self.upgrade_need_wait(txn.id(), &table, rid) {
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                if let Some(queue) = table.get_mut(&rid) {
                    if queue.upgrading == Some(txn.id()) {
                        queue.upgrading = None;
                    }
                }
                return false;
            }
        }

        let queue = table.get_mut(&rid).expect("queue exists");
        queue.upgrading = None;
        for request in queue.requests.iter_mut() {
            if request.txn_id == txn.id() {
                request.mode = LockMode::Exclusive;
                request.granted = true;
                break;
            }
        }
        txn.remove_shared_lock(rid);
        txn.insert_exclusive_lock(rid);
        txn.set_state(TransactionState::Growing);
        true
    }

    /// Release whichever lock `txn` holds (or waits for) on `rid`. Under
    /// REPEATABLE_READ the first unlock of a growing transaction starts its
    /// shrinking phase. Returns false if the transaction held neither mode.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }

        let mut table = self.lock_table.lock();
        if let Some(queue) = table.get_mut(&rid) {
            if let Some(position) = queue.requests.iter().position(|r| r.txn_id == txn.id()) {
                queue.requests.remove(position);
            }
            queue.cv.notify_all();
            if queue.requests.is_empty() && queue.upgrading.is_none() {
                table.remove(&rid);
            }
        }
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }
        true
    }

    /// Release every lock `txn` holds or waits for. Called by the
    /// transaction manager on commit and abort, after the final state is set,
    /// so the 2PL transition in `unlock` does not fire.
    pub fn release_locks(&self, txn: &Transaction) {
        let mut rids: Vec<Rid> = txn.shared_locks().into_iter().collect();
        rids.extend(txn.exclusive_locks());
        for rid in rids {
            self.unlock(txn, rid);
        }
    }

    fn is_aborted(&self, txn_id: TxnId) -> bool {
        self.registry
            .get(txn_id)
            .map_or(false, |txn| txn.state() == TransactionState::Aborted)
    }

    fn mark_granted(queue: &mut LockRequestQueue, txn_id: TxnId) {
        for request in queue.requests.iter_mut() {
            if request.txn_id == txn_id {
                request.granted = true;
                break;
            }
        }
    }

    /// Abort a younger conflicting transaction and wake it wherever it may
    /// be waiting.
    fn wound(&self, table: &HashMap<Rid, LockRequestQueue>, victim: TxnId) {
        if let Some(victim_txn) = self.registry.get(victim) {
            victim_txn.set_state(TransactionState::Aborted);
            debug!("wound-wait aborted txn {}", victim);
        }
        for queue in table.values() {
            if queue.requests.iter().any(|r| r.txn_id == victim) {
                queue.cv.notify_all();
            }
        }
    }

    /// Should a shared request from `me` keep waiting? Shared requests are
    /// granted as a prefix, so a shared head means no waiting. Otherwise,
    /// younger exclusive requests ahead of `me` are wounded and older ones
    /// force a wait.
    fn shared_need_wait(
        &self,
        me: TxnId,
        table: &HashMap<Rid, LockRequestQueue>,
        rid: Rid,
    ) -> bool {
        let queue = table.get(&rid).expect("queue exists");
        match queue
            .requests
            .iter()
            .find(|r| !self.is_aborted(r.txn_id))
        {
            Some(head) if head.mode == LockMode::Shared => return false,
            None => return false,
            _ => {}
        }

        let mut wounded = Vec::new();
        let mut need_wait = false;
        for request in queue.requests.iter() {
            if request.txn_id == me {
                break;
            }
            if self.is_aborted(request.txn_id) {
                continue;
            }
            if request.mode == LockMode::Exclusive {
                if request.txn_id > me {
                    wounded.push(request.txn_id);
                } else {
                    need_wait = true;
                }
            }
        }
        for victim in wounded {
            self.wound(table, victim);
        }
        need_wait
    }

    /// Should an exclusive request from `me` keep waiting? Every live
    /// request ahead of `me` conflicts: younger ones are wounded, older ones
    /// force a wait.
    fn exclusive_need_wait(
        &self,
        me: TxnId,
        table: &HashMap<Rid, LockRequestQueue>,
        rid: Rid,
    ) -> bool {
        let queue = table.get(&rid).expect("queue exists");
        let mut wounded = Vec::new();
        let mut need_wait = false;
        for request in queue.requests.iter() {
            if request.txn_id == me {
                break;
            }
            if self.is_aborted(request.txn_id) {
                continue;
            }
            if request.txn_id > me {
                wounded.push(request.txn_id);
            } else {
                need_wait = true;
            }
        }
        for victim in wounded {
            self.wound(table, victim);
        }
        need_wait
    }

    /// Should an upgrade by `me` keep waiting? The upgrade conflicts with
    /// every other *granted* request on the row, regardless of queue
    /// position: younger holders are wounded, older ones force a wait.
    fn upgrade_need_wait(
        &self,
        me: TxnId,
        table: &HashMap<Rid, LockRequestQueue>,
        rid: Rid,
    ) -> bool {
        let queue = table.get(&rid).expect("queue exists");
        let mut wounded = Vec::new();
        let mut need_wait = false;
        for request in queue.requests.iter() {
            if request.txn_id == me || !request.granted {
                continue;
            }
            if self.is_aborted(request.txn_id) {
                continue;
            }
            if request.txn_id > me {
                wounded.push(request.txn_id);
            } else {
                need_wait = true;
            }
        }
        for victim in wounded {
            self.wound(table, victim);
        }
        need_wait
    }
}
