use thiserror::Error;

/// Errors surfaced by the lock managers and [`crate::TransactionManager`].
#[derive(Debug, Error)]
pub enum TxnError {
    /// `acquire` exceeded its timeout without being granted the lock.
    #[error("lock acquisition timed out")]
    LockTimeout,

    /// The deadlock detector chose this transaction as the youngest member
    /// of a wait cycle and aborted it.
    #[error("transaction aborted to break a deadlock")]
    DeadlockVictim,

    /// Commit-time validation found a conflicting concurrent write.
    #[error("write-write conflict: {0}")]
    Conflict(String),

    /// `txn_id` does not name an active transaction.
    #[error("unknown transaction {0}")]
    UnknownTransaction(u64),

    /// The transaction is not in a state that permits the requested
    /// operation (e.g. writing after commit).
    #[error("invalid transaction state: {0}")]
    InvalidState(String),
}
