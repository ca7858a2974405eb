use thiserror::Error;

use crate::common::types::TxnId;

/// Why the lock manager aborted a transaction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while shrinking")]
    LockOnShrinking,

    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,

    #[error("another transaction is already upgrading on this resource")]
    UpgradeConflict,

    #[error("held lock mode cannot upgrade to the requested mode")]
    IncompatibleUpgrade,

    #[error("intention lock requested on a row")]
    AttemptedIntentionLockOnRow,

    #[error("unlock requested but no lock is held")]
    AttemptedUnlockButNoLockHeld,

    #[error("table unlocked before its row locks were released")]
    TableUnlockedBeforeUnlockingRows,

    #[error("row lock requested without a suitable table lock")]
    TableLockNotPresent,
}

/// Raised by every lock-manager rule violation; the transaction has already
/// been transitioned to `Aborted` when this surfaces.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbortError {
    pub fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}
