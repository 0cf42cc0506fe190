//! # txn — lock managers and the transaction manager
//!
//! Sits on top of [`mvcc`]: the lock managers arbitrate concurrent access
//! to resources (pessimistic wait-based, optimistic validate-at-commit, or
//! a hybrid of the two), and [`TransactionManager`] drives `begin`/`get`/
//! `put`/`delete`/`commit`/`abort` against a shared [`mvcc::MvccManager`],
//! choosing snapshot timestamps and lock discipline per
//! [`IsolationLevel`].

mod context;
mod error;
mod lock;
mod manager;

pub use context::{IsolationLevel, TransactionContext};
pub use error::TxnError;
pub use lock::{HybridLockManager, LockMode, LockManagerStats, OptimisticLockManager, PessimisticLockManager};
pub use manager::TransactionManager;

#[cfg(test)]
mod tests;
