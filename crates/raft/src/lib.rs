//! # raft — single-process Raft consensus
//!
//! A node per [`RaftNode`] participates in leader election and log
//! replication against whatever peers a [`transport::Transport`] can reach.
//! Persisted state (`current_term`, `voted_for`, the log) survives restart
//! via [`storage::RaftStorage`]; everything else (role, commit index,
//! leader tracking) lives in memory and is rebuilt by replaying the
//! persisted log on [`RaftNode::new`].
//!
//! Committed entries are handed one at a time, in order, to a
//! [`state_machine::StateMachine`] — in RiptideKV's own deployment, that
//! machine applies the command bytes as an `engine::Engine` operation.

mod error;
mod node;
mod state_machine;
mod storage;
mod transport;
mod types;

pub use error::RaftError;
pub use node::{NodeConfig, RaftNode};
pub use state_machine::{RecordingStateMachine, StateMachine};
pub use transport::{ChannelTransport, Transport};
pub use types::{
    AppendEntriesArgs, AppendEntriesReply, ClientRequestResult, ClientResponse, Envelope,
    LogEntry, RaftMessage, RequestVoteArgs, RequestVoteReply, Role,
};
