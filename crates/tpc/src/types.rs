//! Wire types for the two-phase commit protocol: the six essential
//! message kinds, the per-transaction participant bookkeeping, and the
//! coordinator's tunables.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoPhaseMessageType {
    Prepare,
    PrepareOk,
    PrepareAbort,
    Commit,
    CommitOk,
    Abort,
    AbortOk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone)]
pub struct DistributedOperation {
    pub node_id: String,
    pub kind: OperationKind,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub sequence_number: u64,
}

#[derive(Debug, Clone)]
pub struct TwoPhaseMessage {
    pub message_type: TwoPhaseMessageType,
    pub transaction_id: String,
    pub coordinator_id: String,
    pub participant_id: String,
    pub operations: Vec<DistributedOperation>,
    pub error_message: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributedTxnState {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Active,
    Prepared,
    Committed,
    Aborted,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    pub state: ParticipantState,
    pub operations: Vec<DistributedOperation>,
}

/// Outcome a caller of [`crate::Coordinator::commit_distributed_transaction`]
/// receives. `InDoubt` is returned, never `Committed`, when the commit phase
/// exhausts its retries without every participant acking — the coordinator
/// keeps the transaction in `Committing` and keeps retrying in the
/// background rather than assuming success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Aborted,
    InDoubt,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub coordinator_id: String,
    pub default_timeout: Duration,
    pub prepare_timeout: Duration,
    pub commit_timeout: Duration,
    pub max_retry_attempts: u32,
    pub poll_interval: Duration,
    pub recovery_interval: Duration,
}

impl CoordinatorConfig {
    #[must_use]
    pub fn new(coordinator_id: impl Into<String>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            default_timeout: Duration::from_secs(30),
            prepare_timeout: Duration::from_secs(10),
            commit_timeout: Duration::from_secs(10),
            max_retry_attempts: 3,
            poll_interval: Duration::from_millis(20),
            recovery_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CoordinatorStats {
    pub total_transactions: u64,
    pub committed_transactions: u64,
    pub aborted_transactions: u64,
    pub in_doubt_transactions: u64,
}
