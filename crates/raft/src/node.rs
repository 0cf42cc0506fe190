//! The Raft node: role state machine, election timeout, log replication,
//! commit advancement, and the client-facing `submit` entry point.
//!
//! State lives behind a single [`parking_lot::Mutex`] (per the one
//! node-level mutex the spec's concurrency model calls for) rather than
//! split into several finer-grained locks — every state transition here
//! touches at least `role`, `current_term`, and the log together, so a
//! single lock avoids a class of interleavings the original header's
//! separate `state_mutex_`/`cluster_mutex_` split had to reason about by
//! hand.

use crate::error::RaftError;
use crate::state_machine::StateMachine;
use crate::storage::RaftStorage;
use crate::transport::Transport;
use crate::types::{
    AppendEntriesArgs, AppendEntriesReply, ClientRequestResult, ClientResponse, Envelope, LogEntry,
    RaftMessage, Role, RequestVoteArgs, RequestVoteReply,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: String,
    pub peers: Vec<String>,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub client_request_timeout: Duration,
}

struct VolatileState {
    role: Role,
    current_term: u64,
    voted_for: Option<String>,
    log: Vec<LogEntry>,
    commit_index: u64,
    last_applied: u64,
    current_leader: Option<String>,
    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
    votes_received: std::collections::HashSet<String>,
    last_contact: Instant,
    election_timeout: Duration,
}

impl VolatileState {
    fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    fn last_log_term(&self) -> u64 {
        self.log.last().map_or(0, |e| e.term)
    }

    fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            0
        } else {
            self.log.get(index as usize - 1).map_or(0, |e| e.term)
        }
    }
}

pub struct RaftNode {
    config: NodeConfig,
    state: Mutex<VolatileState>,
    storage: Mutex<RaftStorage>,
    state_machine: Mutex<Box<dyn StateMachine>>,
    transport: Arc<dyn Transport>,
    inbound_tx: Sender<Envelope>,
    inbound_rx: Receiver<Envelope>,
    running: AtomicBool,
    pending_clients: Mutex<HashMap<u64, (String, Sender<ClientResponse>)>>,
}

fn random_election_timeout(cfg: &NodeConfig) -> Duration {
    let min = cfg.election_timeout_min.as_millis() as u64;
    let max = cfg.election_timeout_max.as_millis() as u64;
    let millis = rand::thread_rng().gen_range(min..=max.max(min));
    Duration::from_millis(millis)
}

impl RaftNode {
    pub fn new(
        config: NodeConfig,
        data_dir: &Path,
        transport: Arc<dyn Transport>,
        state_machine: Box<dyn StateMachine>,
    ) -> Result<Arc<Self>, RaftError> {
        let (storage, current_term, voted_for, log) = RaftStorage::open(data_dir)?;
        let election_timeout = random_election_timeout(&config);
        let (inbound_tx, inbound_rx) = bounded(1024);

        let node = Arc::new(Self {
            state: Mutex::new(VolatileState {
                role: Role::Follower,
                current_term,
                voted_for,
                log,
                commit_index: 0,
                last_applied: 0,
                current_leader: None,
                next_index: HashMap::new(),
                match_index: HashMap::new(),
                votes_received: std::collections::HashSet::new(),
                last_contact: Instant::now(),
                election_timeout,
            }),
            storage: Mutex::new(storage),
            state_machine: Mutex::new(state_machine),
            transport,
            inbound_tx,
            inbound_rx,
            running: AtomicBool::new(false),
            pending_clients: Mutex::new(HashMap::new()),
            config,
        });
        node.transport.register(&node.config.node_id, node.inbound_tx.clone());
        Ok(node)
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.lock().role == Role::Leader
    }

    #[must_use]
    pub fn current_term(&self) -> u64 {
        self.state.lock().current_term
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    #[must_use]
    pub fn commit_index(&self) -> u64 {
        self.state.lock().commit_index
    }

    /// Delivers one inbound message. Transports call this (directly, or by
    /// forwarding onto the channel registered in [`RaftNode::new`]).
    pub fn inbound(&self) -> Sender<Envelope> {
        self.inbound_tx.clone()
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let main = self.clone();
        std::thread::spawn(move || main.main_loop());
        let heartbeat = self.clone();
        std::thread::spawn(move || heartbeat.heartbeat_loop());
        info!(node = %self.config.node_id, "raft node started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn main_loop(self: Arc<Self>) {
        let tick = Duration::from_millis(20);
        while self.running.load(Ordering::SeqCst) {
            match self.inbound_rx.recv_timeout(tick) {
                Ok(envelope) => self.handle_message(&envelope.from, envelope.message),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
            self.check_election_timeout();
            self.apply_committed_entries();
        }
    }

    fn heartbeat_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(self.config.heartbeat_interval);
            if self.is_leader() {
                self.send_heartbeats();
            }
        }
    }

    fn check_election_timeout(&self) {
        let should_elect = {
            let state = self.state.lock();
            state.role != Role::Leader && state.last_contact.elapsed() >= state.election_timeout
        };
        if should_elect {
            self.start_election();
        }
    }

    fn persist(&self, term: u64, voted_for: &Option<String>) {
        if let Err(e) = self.storage.lock().persist_state(term, voted_for) {
            warn!(error = %e, "failed to persist raft state");
        }
    }

    fn start_election(self: &Arc<Self>) {
        let (term, args) = {
            let mut state = self.state.lock();
            state.role = Role::Candidate;
            state.current_term += 1;
            state.voted_for = Some(self.config.node_id.clone());
            state.votes_received = std::collections::HashSet::from([self.config.node_id.clone()]);
            state.last_contact = Instant::now();
            state.election_timeout = random_election_timeout(&self.config);
            let args = RequestVoteArgs {
                term: state.current_term,
                candidate_id: self.config.node_id.clone(),
                last_log_index: state.last_log_index(),
                last_log_term: state.last_log_term(),
            };
            (state.current_term, args)
        };
        self.persist(term, &Some(self.config.node_id.clone()));
        info!(node = %self.config.node_id, term, "starting election");
        for peer in &self.config.peers {
            self.transport
                .send(peer, &self.config.node_id, RaftMessage::RequestVote(args.clone()));
        }
    }

    fn handle_message(self: &Arc<Self>, from: &str, message: RaftMessage) {
        match message {
            RaftMessage::RequestVote(args) => self.handle_request_vote(from, args),
            RaftMessage::RequestVoteReply(reply) => self.handle_request_vote_reply(reply),
            RaftMessage::AppendEntries(args) => self.handle_append_entries(from, args),
            RaftMessage::AppendEntriesReply(reply) => self.handle_append_entries_reply(reply),
            RaftMessage::InstallSnapshot | RaftMessage::InstallSnapshotReply => {
                debug!("snapshot messages are accepted but unused (no compaction in this build)");
            }
        }
    }

    fn handle_request_vote(&self, from: &str, args: RequestVoteArgs) {
        let (term, granted) = {
            let mut state = self.state.lock();
            if args.term > state.current_term {
                self.step_down(&mut state, args.term);
            }
            let up_to_date = args.last_log_term > state.last_log_term()
                || (args.last_log_term == state.last_log_term() && args.last_log_index >= state.last_log_index());
            let can_vote = state.voted_for.is_none() || state.voted_for.as_deref() == Some(args.candidate_id.as_str());
            let granted = args.term == state.current_term && can_vote && up_to_date;
            if granted {
                state.voted_for = Some(args.candidate_id.clone());
                state.last_contact = Instant::now();
            }
            (state.current_term, granted)
        };
        if granted {
            self.persist(term, &Some(args.candidate_id.clone()));
        }
        self.transport.send(
            from,
            &self.config.node_id,
            RaftMessage::RequestVoteReply(RequestVoteReply {
                term,
                vote_granted: granted,
                voter_id: self.config.node_id.clone(),
            }),
        );
    }

    fn handle_request_vote_reply(self: &Arc<Self>, reply: RequestVoteReply) {
        let become_leader = {
            let mut state = self.state.lock();
            if reply.term > state.current_term {
                self.step_down(&mut state, reply.term);
                return;
            }
            if state.role != Role::Candidate || reply.term != state.current_term || !reply.vote_granted {
                false
            } else {
                state.votes_received.insert(reply.voter_id);
                state.votes_received.len() > (self.config.peers.len() + 1) / 2
            }
        };
        if become_leader {
            self.become_leader();
        }
    }

    fn become_leader(self: &Arc<Self>) {
        let last_index = {
            let mut state = self.state.lock();
            if state.role != Role::Candidate {
                return;
            }
            state.role = Role::Leader;
            state.current_leader = Some(self.config.node_id.clone());
            let last_index = state.last_log_index();
            for peer in &self.config.peers {
                state.next_index.insert(peer.clone(), last_index + 1);
                state.match_index.insert(peer.clone(), 0);
            }
            last_index
        };
        info!(node = %self.config.node_id, last_index, "elected leader");
        self.send_heartbeats();
    }

    fn step_down(&self, state: &mut VolatileState, term: u64) {
        state.role = Role::Follower;
        state.current_term = term;
        state.voted_for = None;
        state.current_leader = None;
        state.last_contact = Instant::now();
    }

    fn send_heartbeats(self: &Arc<Self>) {
        for peer in self.config.peers.clone() {
            self.send_append_entries(&peer);
        }
    }

    fn send_append_entries(self: &Arc<Self>, peer: &str) {
        let args = {
            let state = self.state.lock();
            if state.role != Role::Leader {
                return;
            }
            let next = *state.next_index.get(peer).unwrap_or(&(state.last_log_index() + 1));
            let prev_log_index = next.saturating_sub(1);
            let prev_log_term = state.term_at(prev_log_index);
            let entries = state
                .log
                .get(prev_log_index as usize..)
                .map(<[LogEntry]>::to_vec)
                .unwrap_or_default();
            AppendEntriesArgs {
                term: state.current_term,
                leader_id: self.config.node_id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: state.commit_index,
            }
        };
        self.transport
            .send(peer, &self.config.node_id, RaftMessage::AppendEntries(args));
    }

    fn handle_append_entries(&self, from: &str, args: AppendEntriesArgs) {
        let (term, success, match_index) = {
            let mut state = self.state.lock();
            if args.term < state.current_term {
                (state.current_term, false, 0)
            } else {
                if args.term > state.current_term || state.role != Role::Follower {
                    self.step_down(&mut state, args.term);
                }
                state.current_leader = Some(args.leader_id.clone());
                state.last_contact = Instant::now();

                let consistent = args.prev_log_index == 0
                    || (state.last_log_index() >= args.prev_log_index
                        && state.term_at(args.prev_log_index) == args.prev_log_term);

                if !consistent {
                    (state.current_term, false, state.last_log_index())
                } else {
                    let mut insert_at = args.prev_log_index as usize;
                    for entry in &args.entries {
                        if insert_at < state.log.len() {
                            if state.log[insert_at].term != entry.term {
                                state.log.truncate(insert_at);
                                state.log.push(entry.clone());
                            }
                        } else {
                            state.log.push(entry.clone());
                        }
                        insert_at += 1;
                    }
                    if args.leader_commit > state.commit_index {
                        state.commit_index = args.leader_commit.min(state.last_log_index());
                    }
                    let match_index = state.last_log_index();
                    (state.current_term, true, match_index)
                }
            }
        };
        self.transport.send(
            from,
            &self.config.node_id,
            RaftMessage::AppendEntriesReply(AppendEntriesReply {
                term,
                success,
                match_index,
                responder_id: self.config.node_id.clone(),
            }),
        );
    }

    fn handle_append_entries_reply(self: &Arc<Self>, reply: AppendEntriesReply) {
        let mut state = self.state.lock();
        if reply.term > state.current_term {
            self.step_down(&mut state, reply.term);
            return;
        }
        if state.role != Role::Leader || reply.term != state.current_term {
            return;
        }
        if reply.success {
            state.match_index.insert(reply.responder_id.clone(), reply.match_index);
            state.next_index.insert(reply.responder_id, reply.match_index + 1);
            self.advance_commit_index(&mut state);
        } else {
            let next = state.next_index.entry(reply.responder_id.clone()).or_insert(1);
            *next = next.saturating_sub(1).max(1);
        }
    }

    /// A leader commits index N once it's stored on a majority (itself
    /// included) and N's entry was written during the leader's own term —
    /// the classic Raft §5.4.2 restriction that rules out committing (and
    /// thus exposing) a stale leader's entries by majority count alone.
    fn advance_commit_index(&self, state: &mut VolatileState) {
        let majority = (self.config.peers.len() + 1) / 2 + 1;
        let mut candidate = state.commit_index + 1;
        let last = state.last_log_index();
        while candidate <= last {
            let replicated = 1 + self
                .config
                .peers
                .iter()
                .filter(|p| state.match_index.get(*p).copied().unwrap_or(0) >= candidate)
                .count();
            if replicated >= majority && state.term_at(candidate) == state.current_term {
                state.commit_index = candidate;
            }
            candidate += 1;
        }
    }

    fn apply_committed_entries(&self) {
        let entries_to_apply: Vec<LogEntry> = {
            let mut state = self.state.lock();
            let mut entries = Vec::new();
            while state.last_applied < state.commit_index {
                state.last_applied += 1;
                entries.push(state.log[state.last_applied as usize - 1].clone());
            }
            entries
        };
        if entries_to_apply.is_empty() {
            return;
        }
        let mut machine = self.state_machine.lock();
        let mut pending = self.pending_clients.lock();
        for entry in entries_to_apply {
            let response_data = machine.apply(&entry.command);
            if let Some((request_id, tx)) = pending.remove(&entry.index) {
                let _ = tx.send(ClientResponse {
                    request_id,
                    result: ClientRequestResult::Success,
                    response_data,
                    leader_hint: None,
                });
            }
        }
    }

    /// Appends `command` to the log (if this node is currently the leader)
    /// and blocks until it's committed and applied, or `client_request_timeout`
    /// elapses.
    pub fn submit(&self, request_id: String, command: Vec<u8>) -> ClientResponse {
        let index = {
            let mut state = self.state.lock();
            if state.role != Role::Leader {
                return ClientResponse {
                    request_id,
                    result: ClientRequestResult::NotLeader,
                    response_data: Vec::new(),
                    leader_hint: state.current_leader.clone(),
                };
            }
            let entry = LogEntry {
                term: state.current_term,
                index: state.last_log_index() + 1,
                command,
            };
            if let Err(e) = self.storage.lock().append_entry(&entry) {
                warn!(error = %e, "failed to persist log entry");
            }
            let index = entry.index;
            state.match_index.insert(self.config.node_id.clone(), index);
            state.log.push(entry);
            self.advance_commit_index(&mut state);
            index
        };

        let (tx, rx) = bounded(1);
        self.pending_clients.lock().insert(index, (request_id.clone(), tx));

        match rx.recv_timeout(self.config.client_request_timeout) {
            Ok(response) => response,
            Err(_) => {
                self.pending_clients.lock().remove(&index);
                ClientResponse {
                    request_id,
                    result: ClientRequestResult::Timeout,
                    response_data: Vec::new(),
                    leader_hint: None,
                }
            }
        }
    }
}
