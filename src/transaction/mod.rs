pub mod concurrency;

pub use concurrency::{
    IsolationLevel, LockManager, LockManagerConfig, LockMode, Transaction, TransactionManager,
    TransactionState,
};
pub use concurrency::error::{AbortReason, TransactionAbortError};
