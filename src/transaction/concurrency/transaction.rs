use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Default)]
struct TransactionInner {
    state: TransactionState,
    shared_table_locks: HashSet<TableOid>,
    exclusive_table_locks: HashSet<TableOid>,
    intention_shared_table_locks: HashSet<TableOid>,
    intention_exclusive_table_locks: HashSet<TableOid>,
    shared_intention_exclusive_table_locks: HashSet<TableOid>,
    shared_row_locks: HashMap<TableOid, HashSet<Rid>>,
    exclusive_row_locks: HashMap<TableOid, HashSet<Rid>>,
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState::Growing
    }
}

/// An active transaction: an id, an isolation level, a 2PL state, and the
/// bookkeeping of every table and row lock it holds. Shared between the
/// worker thread and the deadlock detector, so the mutable parts sit behind
/// a mutex.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            inner: Mutex::new(TransactionInner::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: TransactionState) {
        self.inner.lock().state = state;
    }

    /// The table lock mode this transaction holds on `oid`, if any.
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let inner = self.inner.lock();
        if inner.exclusive_table_locks.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if inner.intention_exclusive_table_locks.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if inner.shared_intention_exclusive_table_locks.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if inner.intention_shared_table_locks.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else if inner.shared_table_locks.contains(&oid) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// The row lock mode this transaction holds on `rid`, if any.
    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let inner = self.inner.lock();
        if inner
            .exclusive_row_locks
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else if inner
            .shared_row_locks
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    pub fn is_table_shared_locked(&self, oid: TableOid) -> bool {
        self.inner.lock().shared_table_locks.contains(&oid)
    }

    pub fn is_table_exclusive_locked(&self, oid: TableOid) -> bool {
        self.inner.lock().exclusive_table_locks.contains(&oid)
    }

    pub fn is_table_intention_shared_locked(&self, oid: TableOid) -> bool {
        self.inner.lock().intention_shared_table_locks.contains(&oid)
    }

    pub fn is_table_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.inner.lock().intention_exclusive_table_locks.contains(&oid)
    }

    pub fn is_table_shared_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.inner
            .lock()
            .shared_intention_exclusive_table_locks
            .contains(&oid)
    }

    pub fn is_row_shared_locked(&self, oid: TableOid, rid: Rid) -> bool {
        self.inner
            .lock()
            .shared_row_locks
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    pub fn is_row_exclusive_locked(&self, oid: TableOid, rid: Rid) -> bool {
        self.inner
            .lock()
            .exclusive_row_locks
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    /// True when any row of `oid` is still locked by this transaction.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let inner = self.inner.lock();
        inner
            .shared_row_locks
            .get(&oid)
            .is_some_and(|rows| !rows.is_empty())
            || inner
                .exclusive_row_locks
                .get(&oid)
                .is_some_and(|rows| !rows.is_empty())
    }

    pub(crate) fn record_table_lock(&self, oid: TableOid, mode: LockMode) {
        let mut inner = self.inner.lock();
        match mode {
            LockMode::Shared => inner.shared_table_locks.insert(oid),
            LockMode::Exclusive => inner.exclusive_table_locks.insert(oid),
            LockMode::IntentionShared => inner.intention_shared_table_locks.insert(oid),
            LockMode::IntentionExclusive => inner.intention_exclusive_table_locks.insert(oid),
            LockMode::SharedIntentionExclusive => {
                inner.shared_intention_exclusive_table_locks.insert(oid)
            }
        };
    }

    pub(crate) fn erase_table_lock(&self, oid: TableOid, mode: LockMode) {
        let mut inner = self.inner.lock();
        match mode {
            LockMode::Shared => inner.shared_table_locks.remove(&oid),
            LockMode::Exclusive => inner.exclusive_table_locks.remove(&oid),
            LockMode::IntentionShared => inner.intention_shared_table_locks.remove(&oid),
            LockMode::IntentionExclusive => inner.intention_exclusive_table_locks.remove(&oid),
            LockMode::SharedIntentionExclusive => {
                inner.shared_intention_exclusive_table_locks.remove(&oid)
            }
        };
    }

    pub(crate) fn record_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut inner = self.inner.lock();
        match mode {
            LockMode::Shared => inner.shared_row_locks.entry(oid).or_default().insert(rid),
            LockMode::Exclusive => inner.exclusive_row_locks.entry(oid).or_default().insert(rid),
            _ => unreachable!("intention modes are rejected on rows"),
        };
    }

    pub(crate) fn erase_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut inner = self.inner.lock();
        match mode {
            LockMode::Shared => {
                if let Some(rows) = inner.shared_row_locks.get_mut(&oid) {
                    rows.remove(&rid);
                }
            }
            LockMode::Exclusive => {
                if let Some(rows) = inner.exclusive_row_locks.get_mut(&oid) {
                    rows.remove(&rid);
                }
            }
            _ => unreachable!("intention modes are rejected on rows"),
        }
    }

    /// Snapshot of every held table lock, for lock release at commit/abort.
    pub(crate) fn snapshot_table_locks(&self) -> Vec<(TableOid, LockMode)> {
        let inner = self.inner.lock();
        let mut locks = Vec::new();
        for &oid in &inner.shared_table_locks {
            locks.push((oid, LockMode::Shared));
        }
        for &oid in &inner.exclusive_table_locks {
            locks.push((oid, LockMode::Exclusive));
        }
        for &oid in &inner.intention_shared_table_locks {
            locks.push((oid, LockMode::IntentionShared));
        }
        for &oid in &inner.intention_exclusive_table_locks {
            locks.push((oid, LockMode::IntentionExclusive));
        }
        for &oid in &inner.shared_intention_exclusive_table_locks {
            locks.push((oid, LockMode::SharedIntentionExclusive));
        }
        locks
    }

    /// Snapshot of every held row lock, for lock release at commit/abort.
    pub(crate) fn snapshot_row_locks(&self) -> Vec<(TableOid, Rid, LockMode)> {
        let inner = self.inner.lock();
        let mut locks = Vec::new();
        for (&oid, rows) in &inner.shared_row_locks {
            for &rid in rows {
                locks.push((oid, rid, LockMode::Shared));
            }
        }
        for (&oid, rows) in &inner.exclusive_row_locks {
            for &rid in rows {
                locks.push((oid, rid, LockMode::Exclusive));
            }
        }
        locks
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
    }

    #[test]
    fn test_table_lock_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        txn.record_table_lock(10, LockMode::IntentionExclusive);
        assert!(txn.is_table_intention_exclusive_locked(10));
        assert_eq!(txn.table_lock_mode(10), Some(LockMode::IntentionExclusive));

        txn.erase_table_lock(10, LockMode::IntentionExclusive);
        assert_eq!(txn.table_lock_mode(10), None);
    }

    #[test]
    fn test_row_lock_bookkeeping() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        let rid = Rid::new(4, 2);
        txn.record_row_lock(10, rid, LockMode::Exclusive);
        assert!(txn.is_row_exclusive_locked(10, rid));
        assert!(txn.holds_row_locks_on(10));
        assert!(!txn.holds_row_locks_on(11));

        txn.erase_row_lock(10, rid, LockMode::Exclusive);
        assert!(!txn.is_row_exclusive_locked(10, rid));
        assert!(!txn.holds_row_locks_on(10));
    }
}
