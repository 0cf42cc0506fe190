//! # tpc — two-phase commit coordinator and participant
//!
//! A [`Coordinator`] allocates a global transaction id, partitions a batch
//! of [`DistributedOperation`]s across their target nodes, and drives
//! PREPARE → COMMIT/ABORT against whatever a [`transport::Transport`] can
//! reach. Each target node runs a [`Participant`], which stages the
//! operations through its own `txn::TransactionManager` and holds the
//! local transaction open — in-doubt, if the coordinator goes quiet —
//! until told to commit or abort.
//!
//! Coordinator failure between deciding and notifying every participant is
//! the one failure mode this module doesn't resolve on its own: a
//! participant left `PREPARED` blocks (its locks held) until a recovery
//! request arrives, and building that recovery protocol is out of scope
//! here.

mod clock;
mod coordinator;
mod error;
mod participant;
mod transport;
mod types;

pub use coordinator::Coordinator;
pub use error::TpcError;
pub use participant::Participant;
pub use transport::{ChannelTransport, Transport};
pub use types::{
    CommitOutcome, CoordinatorConfig, CoordinatorStats, DistributedOperation, DistributedTxnState,
    OperationKind, ParticipantState, TwoPhaseMessage, TwoPhaseMessageType,
};
