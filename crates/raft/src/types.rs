//! Wire and log types shared by every module in this crate.

use serde::{Deserialize, Serialize};

/// A node's role in the Raft state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// One entry in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
    pub voter_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    pub match_index: u64,
    pub responder_id: String,
}

/// Every message exchanged between nodes. `InstallSnapshot*` variants are
/// accepted for wire-compatibility with the spec's message catalog but this
/// implementation always has a short enough log to replicate from index 0,
/// so a leader never actually emits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVoteArgs),
    RequestVoteReply(RequestVoteReply),
    AppendEntries(AppendEntriesArgs),
    AppendEntriesReply(AppendEntriesReply),
    InstallSnapshot,
    InstallSnapshotReply,
}

/// An envelope pairing a message with its sender, used on the inbound
/// channel so the receiving node knows which peer to reply to.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: String,
    pub message: RaftMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequestResult {
    Success,
    NotLeader,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub request_id: String,
    pub result: ClientRequestResult,
    pub response_data: Vec<u8>,
    /// Populated with the last known leader when `result` is `NotLeader`.
    pub leader_hint: Option<String>,
}
