use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Creates and tracks transactions, and tears their locks down at commit
/// and abort.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
        }
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id: TxnId = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.lock_manager.register_txn(Arc::clone(&txn));
        debug!("txn {txn_id} begins ({isolation_level:?})");
        txn
    }

    /// Look up a live transaction by id.
    pub fn transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.lock_manager.transaction(txn_id)
    }

    /// Commit: release every held lock and retire the transaction. Returns
    /// false when the transaction had already been aborted (e.g. by
    /// deadlock detection); its locks are still released.
    pub fn commit(&self, txn: &Arc<Transaction>) -> bool {
        let already_aborted = txn.state() == TransactionState::Aborted;
        if !already_aborted {
            txn.set_state(TransactionState::Committed);
        }
        self.lock_manager.release_all_locks(txn);
        self.lock_manager.unregister_txn(txn.id());
        debug!("txn {} commit ({})", txn.id(), !already_aborted);
        !already_aborted
    }

    /// Abort: release every held lock and retire the transaction.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all_locks(txn);
        self.lock_manager.unregister_txn(txn.id());
        debug!("txn {} aborted", txn.id());
    }
}
