use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::deadlock::WaitsForGraph;
use crate::transaction::concurrency::error::{AbortReason, TransactionAbortError};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Multi-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The standard multi-granularity compatibility matrix.
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Legal upgrade edges: IS -> {S, X, IX, SIX}, S -> {X, SIX},
    /// IX -> {X, SIX}, SIX -> X.
    pub fn can_upgrade_to(self, target: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, target),
            (IntentionShared, Shared)
                | (IntentionShared, Exclusive)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, SharedIntentionExclusive)
                | (Shared, Exclusive)
                | (Shared, SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive)
                | (IntentionExclusive, SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    oid: TableOid,
    rid: Option<Rid>,
    granted: bool,
}

#[derive(Default)]
struct RequestQueueState {
    /// FIFO arrival order; an upgrade re-enters ahead of the pending tail
    requests: Vec<LockRequest>,
    /// At most one transaction may be upgrading on a resource at a time
    upgrading: Option<TxnId>,
}

struct LockRequestQueue {
    state: Mutex<RequestQueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(RequestQueueState::default()),
            cv: Condvar::new(),
        }
    }
}

pub struct LockManagerConfig {
    /// How often the background deadlock detector wakes up
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}

/// Table- and row-level two-phase lock manager with FIFO request queues,
/// lock upgrades, isolation-level enforcement and background deadlock
/// detection.
///
/// Locking discipline inside the manager: a map latch is always taken
/// before (and released before waiting on) a queue latch, queue latches are
/// never nested, and the detector alone holds the waits-for latch outermost,
/// then both map latches, then one queue latch at a time.
pub struct LockManager {
    config: LockManagerConfig,
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    waits_for: Mutex<WaitsForGraph>,
    /// Registry of live transactions, for deadlock aborts by id
    txn_table: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    detection_running: Arc<AtomicBool>,
    detection_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            config,
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::new()),
            txn_table: Mutex::new(HashMap::new()),
            detection_running: Arc::new(AtomicBool::new(false)),
            detection_thread: Mutex::new(None),
        }
    }

    /// Acquire a table lock, blocking until every earlier request on the
    /// queue is compatible. `Ok(false)` means the wait was cancelled because
    /// deadlock detection aborted this transaction.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbortError> {
        self.validate_request(txn, mode)?;

        let mut upgrade_from = None;
        if let Some(held) = txn.table_lock_mode(oid) {
            if held == mode {
                return Ok(true);
            }
            self.validate_upgrade(txn, held, mode)?;
            upgrade_from = Some(held);
        }

        trace!("txn {} requests {:?} on table {}", txn.id(), mode, oid);
        let queue = self.table_queue(oid);
        let request = LockRequest {
            txn_id: txn.id(),
            mode,
            oid,
            rid: None,
            granted: false,
        };
        self.acquire(&queue, txn, request, upgrade_from)
    }

    /// Release a table lock. Rejected while any row of the table is still
    /// locked by this transaction.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionAbortError> {
        let Some(held) = txn.table_lock_mode(oid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        trace!("txn {} unlocks table {}", txn.id(), oid);
        let queue = self.table_queue(oid);
        {
            let mut state = queue.state.lock();
            if let Some(pos) = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id() && r.granted)
            {
                state.requests.remove(pos);
            }
        }
        txn.erase_table_lock(oid, held);
        self.update_state_on_unlock(txn, held);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Acquire a row lock. Rows take only S or X, and require a suitable
    /// table lock first.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        self.validate_request(txn, mode)?;
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        let Some(table_mode) = txn.table_lock_mode(oid) else {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        };
        if mode == LockMode::Exclusive
            && !matches!(
                table_mode,
                LockMode::Exclusive
                    | LockMode::IntentionExclusive
                    | LockMode::SharedIntentionExclusive
            )
        {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        let mut upgrade_from = None;
        if let Some(held) = txn.row_lock_mode(oid, rid) {
            if held == mode {
                return Ok(true);
            }
            self.validate_upgrade(txn, held, mode)?;
            upgrade_from = Some(held);
        }

        trace!("txn {} requests {:?} on row {}", txn.id(), mode, rid);
        let queue = self.row_queue(rid);
        let request = LockRequest {
            txn_id: txn.id(),
            mode,
            oid,
            rid: Some(rid),
            granted: false,
        };
        self.acquire(&queue, txn, request, upgrade_from)
    }

    /// Release a row lock.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        let Some(held) = txn.row_lock_mode(oid, rid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        trace!("txn {} unlocks row {}", txn.id(), rid);
        let queue = self.row_queue(rid);
        {
            let mut state = queue.state.lock();
            if let Some(pos) = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id() && r.granted)
            {
                state.requests.remove(pos);
            }
        }
        txn.erase_row_lock(oid, rid, held);
        self.update_state_on_unlock(txn, held);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Drop every lock the transaction still holds, rows before tables,
    /// with no 2PL state transitions. Used at commit and abort.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for (oid, rid, mode) in txn.snapshot_row_locks() {
            let queue = self.row_queue(rid);
            {
                let mut state = queue.state.lock();
                if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
                    state.requests.remove(pos);
                }
            }
            txn.erase_row_lock(oid, rid, mode);
            queue.cv.notify_all();
        }
        for (oid, mode) in txn.snapshot_table_locks() {
            let queue = self.table_queue(oid);
            {
                let mut state = queue.state.lock();
                if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
                    state.requests.remove(pos);
                }
            }
            txn.erase_table_lock(oid, mode);
            queue.cv.notify_all();
        }
    }

    pub(crate) fn register_txn(&self, txn: Arc<Transaction>) {
        self.txn_table.lock().insert(txn.id(), txn);
    }

    pub(crate) fn unregister_txn(&self, txn_id: TxnId) {
        self.txn_table.lock().remove(&txn_id);
    }

    pub fn transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_table.lock().get(&txn_id).cloned()
    }

    /// Spawn the background deadlock detector. It wakes every
    /// `cycle_detection_interval`, rebuilds the waits-for graph from the
    /// queues, and aborts the youngest transaction of every cycle.
    pub fn start_deadlock_detection(self: &Arc<Self>) {
        let weak: Weak<LockManager> = Arc::downgrade(self);
        let running = Arc::clone(&self.detection_running);
        running.store(true, Ordering::SeqCst);
        let interval = self.config.cycle_detection_interval;

        let handle = thread::Builder::new()
            .name("deadlock-detector".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let Some(lock_manager) = weak.upgrade() else {
                        break;
                    };
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    lock_manager.run_cycle_detection();
                }
            })
            .expect("failed to spawn deadlock detector");
        *self.detection_thread.lock() = Some(handle);
    }

    pub fn stop_deadlock_detection(&self) {
        self.detection_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detection_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// One detection tick: waits-for latch, then both map latches, then each
    /// queue in turn; abort the youngest member of every cycle and wake the
    /// queues it was waiting on. The graph is scratch state, cleared at the
    /// end of the tick.
    fn run_cycle_detection(&self) {
        let mut waits_for = self.waits_for.lock();
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();

        let mut waiting_queues: HashMap<TxnId, Vec<Arc<LockRequestQueue>>> = HashMap::new();
        for queue in table_map.values().chain(row_map.values()) {
            let state = queue.state.lock();
            let granted: Vec<TxnId> = state
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn_id)
                .collect();
            for request in state.requests.iter().filter(|r| !r.granted) {
                for &holder in &granted {
                    waits_for.add_edge(request.txn_id, holder);
                }
                waiting_queues
                    .entry(request.txn_id)
                    .or_default()
                    .push(Arc::clone(queue));
            }
        }

        while let Some(victim) = waits_for.find_cycle_victim() {
            debug!("deadlock detected, aborting youngest txn {victim}");
            if let Some(txn) = self.txn_table.lock().get(&victim).cloned() {
                txn.set_state(TransactionState::Aborted);
            }
            waits_for.remove_transaction(victim);
            if let Some(queues) = waiting_queues.get(&victim) {
                for queue in queues {
                    queue.cv.notify_all();
                }
            }
        }
        waits_for.clear();
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.table_lock_map
                .lock()
                .entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.row_lock_map
                .lock()
                .entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    /// Queue insertion plus the FIFO wait loop shared by table and row
    /// paths. The caller has already validated the request.
    fn acquire(
        &self,
        queue: &LockRequestQueue,
        txn: &Arc<Transaction>,
        request: LockRequest,
        upgrade_from: Option<LockMode>,
    ) -> Result<bool, TransactionAbortError> {
        let txn_id = request.txn_id;
        let mode = request.mode;
        let mut state = queue.state.lock();

        if let Some(held) = upgrade_from {
            if state.upgrading.is_some() {
                drop(state);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            state.upgrading = Some(txn_id);

            // Drop the held request, then re-enter ahead of the pending
            // tail but behind everything already granted.
            if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn_id) {
                state.requests.remove(pos);
            }
            match request.rid {
                Some(rid) => txn.erase_row_lock(request.oid, rid, held),
                None => txn.erase_table_lock(request.oid, held),
            }
            let pos = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(pos, request.clone());
        } else {
            state.requests.push(request.clone());
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                // Deadlock detection cancelled this wait.
                if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn_id) {
                    state.requests.remove(pos);
                }
                if state.upgrading == Some(txn_id) {
                    state.upgrading = None;
                }
                drop(state);
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::grantable(&state.requests, txn_id, mode) {
                break;
            }
            queue.cv.wait(&mut state);
        }

        if let Some(entry) = state.requests.iter_mut().find(|r| r.txn_id == txn_id) {
            entry.granted = true;
        }
        if state.upgrading == Some(txn_id) {
            state.upgrading = None;
        }
        match request.rid {
            Some(rid) => txn.record_row_lock(request.oid, rid, mode),
            None => txn.record_table_lock(request.oid, mode),
        }
        drop(state);
        queue.cv.notify_all();
        trace!("txn {} granted {:?}", txn_id, mode);
        Ok(true)
    }

    /// A request is grantable when every earlier request on the queue,
    /// granted or pending, is compatible with its mode. FIFO order keeps
    /// writers from starving.
    fn grantable(requests: &[LockRequest], txn_id: TxnId, mode: LockMode) -> bool {
        for request in requests {
            if request.txn_id == txn_id {
                return true;
            }
            if !request.mode.is_compatible_with(mode) {
                return false;
            }
        }
        false
    }

    /// Enforce state- and isolation-level rules before a request touches
    /// any queue.
    fn validate_request(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionAbortError> {
        use LockMode::*;
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Err(self.abort(txn, AbortReason::LockOnShrinking));
        }
        if state == TransactionState::Shrinking {
            return match txn.isolation_level() {
                IsolationLevel::RepeatableRead => Err(self.abort(txn, AbortReason::LockOnShrinking)),
                IsolationLevel::ReadCommitted => {
                    if matches!(mode, IntentionShared | Shared) {
                        Ok(())
                    } else {
                        Err(self.abort(txn, AbortReason::LockOnShrinking))
                    }
                }
                IsolationLevel::ReadUncommitted => {
                    if matches!(mode, IntentionExclusive | Exclusive) {
                        Ok(())
                    } else {
                        Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted))
                    }
                }
            };
        }
        // Growing
        if txn.isolation_level() == IsolationLevel::ReadUncommitted
            && !matches!(mode, IntentionExclusive | Exclusive)
        {
            return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        Ok(())
    }

    fn validate_upgrade(
        &self,
        txn: &Arc<Transaction>,
        held: LockMode,
        requested: LockMode,
    ) -> Result<(), TransactionAbortError> {
        if held.can_upgrade_to(requested) {
            Ok(())
        } else {
            Err(self.abort(txn, AbortReason::IncompatibleUpgrade))
        }
    }

    /// Releasing S or X moves a growing transaction into its shrinking
    /// phase, except that READ_COMMITTED lets go of S locks freely.
    fn update_state_on_unlock(&self, txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        match mode {
            LockMode::Shared | LockMode::Exclusive => {}
            _ => return,
        }
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => txn.set_state(TransactionState::Shrinking),
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                if mode == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
        }
    }

    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbortError {
        txn.set_state(TransactionState::Aborted);
        debug!("txn {} aborted: {reason}", txn.id());
        TransactionAbortError::new(txn.id(), reason)
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.detection_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detection_thread.get_mut().take() {
            let _ = handle.join();
        }
    }
}
