//! Per-transaction state: isolation level, snapshot timestamp, and the
//! buffered write set applied atomically at commit.

use std::collections::HashMap;

/// Isolation level requested at [`crate::TransactionManager::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Every statement sees a fresh snapshot as of its own start.
    ReadCommitted,
    /// The whole transaction sees one snapshot pinned at its start time.
    RepeatableRead,
    /// `RepeatableRead` plus strict two-phase locking: reads and writes
    /// take pessimistic S/X locks held until commit.
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnState {
    Active,
    Preparing,
    Committed,
    Aborted,
}

/// A transaction's mutable bookkeeping. Cloned out of
/// [`crate::TransactionManager`] for inspection; the manager itself holds
/// the authoritative copy.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub txn_id: u64,
    pub isolation: IsolationLevel,
    pub start_ts: u64,
    pub(crate) state: TxnState,
    /// Keys written (or deleted, as `None`) by this transaction, buffered
    /// here so commit-time validation can see the full write set before
    /// anything is applied.
    pub(crate) write_set: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl TransactionContext {
    pub(crate) fn new(txn_id: u64, isolation: IsolationLevel, start_ts: u64) -> Self {
        Self {
            txn_id,
            isolation,
            start_ts,
            state: TxnState::Active,
            write_set: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }
}
