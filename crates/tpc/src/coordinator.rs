//! The coordinator side of 2PC: allocates a global transaction id,
//! partitions a batch of operations across their target participants, and
//! drives PREPARE → COMMIT/ABORT.
//!
//! Background loops (per the node's concurrency model): a `coordinator_main_loop`
//! dispatching inbound replies, a `timeout_checker_loop` auto-aborting
//! transactions a caller began but never resolved, and a `recovery_loop`
//! stub — the recovery protocol that resolves in-doubt participants after a
//! coordinator restart is explicitly out of scope here; the loop exists as
//! the place it would hook in.

use crate::clock::now_ms;
use crate::error::TpcError;
use crate::transport::Transport;
use crate::types::{
    CommitOutcome, CoordinatorConfig, CoordinatorStats, DistributedOperation, DistributedTxnState,
    ParticipantRecord, ParticipantState, TwoPhaseMessage, TwoPhaseMessageType,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

struct DistributedTransactionContext {
    transaction_id: String,
    state: DistributedTxnState,
    participants: HashMap<String, ParticipantRecord>,
    started_at: Instant,
    timeout: Duration,
    error: Option<String>,
}

impl DistributedTransactionContext {
    fn all_in(&self, state: ParticipantState) -> bool {
        self.participants.values().all(|p| p.state == state)
    }

    fn any_in(&self, state: ParticipantState) -> bool {
        self.participants.values().any(|p| p.state == state)
    }
}

enum PrepareOutcome {
    AllPrepared,
    Aborted,
    TimedOut,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    transport: Arc<dyn Transport>,
    transactions: Mutex<HashMap<String, Arc<Mutex<DistributedTransactionContext>>>>,
    completed: Mutex<HashMap<String, DistributedTxnState>>,
    next_id: AtomicU64,
    inbound_tx: Sender<TwoPhaseMessage>,
    inbound_rx: Receiver<TwoPhaseMessage>,
    running: AtomicBool,
    stats: Mutex<CoordinatorStats>,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: CoordinatorConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let coordinator = Arc::new(Self {
            transport,
            transactions: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            inbound_tx,
            inbound_rx,
            running: AtomicBool::new(false),
            stats: Mutex::new(CoordinatorStats::default()),
            config,
        });
        coordinator
            .transport
            .register(&coordinator.config.coordinator_id, coordinator.inbound_tx.clone());
        coordinator
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let main = self.clone();
        std::thread::spawn(move || main.coordinator_main_loop());
        let timeouts = self.clone();
        std::thread::spawn(move || timeouts.timeout_checker_loop());
        let recovery = self.clone();
        std::thread::spawn(move || recovery.recovery_loop());
        info!(coordinator = %self.config.coordinator_id, "2pc coordinator started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        *self.stats.lock()
    }

    /// Generates a global transaction id from the coordinator id, a
    /// monotonic counter, and wall-clock time — unique within this
    /// coordinator's lifetime and, across coordinators, as unique as their
    /// ids.
    fn generate_transaction_id(&self) -> String {
        let counter = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}-{}", self.config.coordinator_id, counter, now_ms())
    }

    /// Registers a new distributed transaction, partitioning `operations`
    /// by their target participant. Returns the freshly allocated global
    /// transaction id.
    pub fn begin_distributed_transaction(&self, operations: Vec<DistributedOperation>, timeout: Duration) -> String {
        let transaction_id = self.generate_transaction_id();
        let mut participants: HashMap<String, ParticipantRecord> = HashMap::new();
        for op in operations {
            participants
                .entry(op.node_id.clone())
                .or_insert_with(|| ParticipantRecord {
                    state: ParticipantState::Active,
                    operations: Vec::new(),
                })
                .operations
                .push(op);
        }
        let ctx = DistributedTransactionContext {
            transaction_id: transaction_id.clone(),
            state: DistributedTxnState::Active,
            participants,
            started_at: Instant::now(),
            timeout,
            error: None,
        };
        self.transactions
            .lock()
            .insert(transaction_id.clone(), Arc::new(Mutex::new(ctx)));
        self.stats.lock().total_transactions += 1;
        transaction_id
    }

    #[must_use]
    pub fn get_transaction_state(&self, transaction_id: &str) -> Option<DistributedTxnState> {
        if let Some(ctx) = self.transactions.lock().get(transaction_id) {
            return Some(ctx.lock().state);
        }
        self.completed.lock().get(transaction_id).copied()
    }

    #[must_use]
    pub fn active_transactions(&self) -> Vec<String> {
        self.transactions.lock().keys().cloned().collect()
    }

    /// The most recent participant-reported error for a still-active
    /// transaction, if any (e.g. a `PREPARE_ABORT`'s reason).
    #[must_use]
    pub fn transaction_error(&self, transaction_id: &str) -> Option<String> {
        self.transactions.lock().get(transaction_id)?.lock().error.clone()
    }

    fn lookup(&self, transaction_id: &str) -> Result<Arc<Mutex<DistributedTransactionContext>>, TpcError> {
        self.transactions
            .lock()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| TpcError::UnknownTransaction(transaction_id.to_string()))
    }

    /// Drives the full commit protocol: PREPARE, then either COMMIT or
    /// ABORT depending on the prepare outcome. Blocks the calling thread
    /// until the transaction reaches a terminal (or in-doubt) outcome.
    pub fn commit_distributed_transaction(&self, transaction_id: &str) -> Result<CommitOutcome, TpcError> {
        let ctx = self.lookup(transaction_id)?;

        let outcome = match self.execute_prepare_phase(&ctx) {
            PrepareOutcome::AllPrepared => {
                if self.execute_commit_phase(&ctx) {
                    CommitOutcome::Committed
                } else {
                    CommitOutcome::InDoubt
                }
            }
            PrepareOutcome::Aborted | PrepareOutcome::TimedOut => {
                ctx.lock().state = DistributedTxnState::Aborting;
                self.execute_abort_phase(&ctx);
                CommitOutcome::Aborted
            }
        };

        self.finish(transaction_id, outcome);
        Ok(outcome)
    }

    /// Explicitly aborts a transaction that hasn't started committing yet
    /// (e.g. the caller decided not to proceed after `begin`).
    pub fn abort_distributed_transaction(&self, transaction_id: &str) -> Result<(), TpcError> {
        let ctx = self.lookup(transaction_id)?;
        ctx.lock().state = DistributedTxnState::Aborting;
        self.execute_abort_phase(&ctx);
        self.finish(transaction_id, CommitOutcome::Aborted);
        Ok(())
    }

    fn finish(&self, transaction_id: &str, outcome: CommitOutcome) {
        if let Some(ctx) = self.transactions.lock().remove(transaction_id) {
            let state = ctx.lock().state;
            self.completed.lock().insert(transaction_id.to_string(), state);
        }
        let mut stats = self.stats.lock();
        match outcome {
            CommitOutcome::Committed => stats.committed_transactions += 1,
            CommitOutcome::Aborted => stats.aborted_transactions += 1,
            CommitOutcome::InDoubt => stats.in_doubt_transactions += 1,
        }
    }

    fn send_to_participants(&self, ctx: &Arc<Mutex<DistributedTransactionContext>>, message_type: TwoPhaseMessageType) {
        let (transaction_id, coordinator_id, targets): (String, String, Vec<(String, Vec<DistributedOperation>)>) = {
            let c = ctx.lock();
            (
                c.transaction_id.clone(),
                self.config.coordinator_id.clone(),
                c.participants
                    .iter()
                    .map(|(id, p)| (id.clone(), p.operations.clone()))
                    .collect(),
            )
        };
        for (participant_id, operations) in targets {
            let operations = if message_type == TwoPhaseMessageType::Prepare {
                operations
            } else {
                Vec::new()
            };
            self.transport.send(
                &participant_id,
                TwoPhaseMessage {
                    message_type,
                    transaction_id: transaction_id.clone(),
                    coordinator_id: coordinator_id.clone(),
                    participant_id,
                    operations,
                    error_message: None,
                    timestamp_ms: now_ms(),
                },
            );
        }
    }

    fn execute_prepare_phase(&self, ctx: &Arc<Mutex<DistributedTransactionContext>>) -> PrepareOutcome {
        ctx.lock().state = DistributedTxnState::Preparing;
        self.send_to_participants(ctx, TwoPhaseMessageType::Prepare);

        let deadline = Instant::now() + self.config.prepare_timeout;
        loop {
            {
                let c = ctx.lock();
                if c.any_in(ParticipantState::Aborted) || c.any_in(ParticipantState::Failed) {
                    return PrepareOutcome::Aborted;
                }
                if c.all_in(ParticipantState::Prepared) {
                    return PrepareOutcome::AllPrepared;
                }
            }
            if Instant::now() >= deadline {
                warn!(transaction_id = %ctx.lock().transaction_id, "prepare phase timed out");
                return PrepareOutcome::TimedOut;
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Resends COMMIT to any participant not yet `Committed`, up to
    /// `max_retry_attempts` times. Per the redesigned failure semantics,
    /// exhausting retries never flips the transaction to `Committed` on
    /// its own — it stays `Committing` and the caller sees
    /// [`CommitOutcome::InDoubt`], with the stuck participants logged for
    /// operator attention.
    fn execute_commit_phase(&self, ctx: &Arc<Mutex<DistributedTransactionContext>>) -> bool {
        ctx.lock().state = DistributedTxnState::Committing;

        for attempt in 0..=self.config.max_retry_attempts {
            let pending = pending_participants(ctx, ParticipantState::Committed);
            if pending.is_empty() {
                ctx.lock().state = DistributedTxnState::Committed;
                return true;
            }
            if attempt > 0 {
                info!(transaction_id = %ctx.lock().transaction_id, attempt, ?pending, "retrying commit");
            }
            self.send_to_participants(ctx, TwoPhaseMessageType::Commit);

            let deadline = Instant::now() + self.config.commit_timeout;
            while Instant::now() < deadline {
                if ctx.lock().all_in(ParticipantState::Committed) {
                    break;
                }
                std::thread::sleep(self.config.poll_interval);
            }
        }

        let stuck = pending_participants(ctx, ParticipantState::Committed);
        if stuck.is_empty() {
            ctx.lock().state = DistributedTxnState::Committed;
            return true;
        }
        let transaction_id = ctx.lock().transaction_id.clone();
        error!(
            transaction_id = %transaction_id,
            stuck_participants = ?stuck,
            "commit phase exhausted retries; transaction remains COMMITTING pending operator intervention"
        );
        false
    }

    /// Resends ABORT up to `max_retry_attempts` times; unlike commit, abort
    /// is best-effort — once retries are exhausted the transaction is
    /// marked `Aborted` regardless, since an unacknowledged abort never
    /// leaves committed state on a participant's store.
    fn execute_abort_phase(&self, ctx: &Arc<Mutex<DistributedTransactionContext>>) {
        for attempt in 0..=self.config.max_retry_attempts {
            let pending = pending_participants(ctx, ParticipantState::Aborted);
            if pending.is_empty() {
                break;
            }
            if attempt > 0 {
                info!(transaction_id = %ctx.lock().transaction_id, attempt, ?pending, "retrying abort");
            }
            self.send_to_participants(ctx, TwoPhaseMessageType::Abort);

            let deadline = Instant::now() + self.config.commit_timeout;
            while Instant::now() < deadline {
                if ctx.lock().all_in(ParticipantState::Aborted) {
                    break;
                }
                std::thread::sleep(self.config.poll_interval);
            }
        }
        let mut c = ctx.lock();
        let unresponsive: Vec<String> = c
            .participants
            .iter()
            .filter(|(_, p)| p.state != ParticipantState::Aborted)
            .map(|(id, _)| id.clone())
            .collect();
        if !unresponsive.is_empty() {
            warn!(transaction_id = %c.transaction_id, ?unresponsive, "abort phase gave up retrying; marking transaction aborted best-effort");
        }
        c.state = DistributedTxnState::Aborted;
    }

    /// Applies an inbound reply to the owning transaction's participant
    /// table. Unknown transaction ids (a late reply for an already-finished
    /// transaction) are logged and dropped.
    pub fn handle_message(&self, message: TwoPhaseMessage) {
        let ctx = match self.transactions.lock().get(&message.transaction_id).cloned() {
            Some(ctx) => ctx,
            None => {
                warn!(transaction_id = %message.transaction_id, "reply for unknown or already-finished transaction");
                return;
            }
        };
        let mut c = ctx.lock();
        let new_state = match message.message_type {
            TwoPhaseMessageType::PrepareOk => Some(ParticipantState::Prepared),
            TwoPhaseMessageType::PrepareAbort => Some(ParticipantState::Aborted),
            TwoPhaseMessageType::CommitOk => Some(ParticipantState::Committed),
            TwoPhaseMessageType::AbortOk => Some(ParticipantState::Aborted),
            TwoPhaseMessageType::Prepare | TwoPhaseMessageType::Commit | TwoPhaseMessageType::Abort => None,
        };
        if let (Some(state), Some(record)) = (new_state, c.participants.get_mut(&message.participant_id)) {
            record.state = state;
        }
        if let Some(error) = message.error_message {
            c.error = Some(error);
        }
    }

    fn coordinator_main_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.inbound_rx.recv_timeout(Duration::from_millis(20)) {
                Ok(message) => self.handle_message(message),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Auto-aborts transactions a caller `begin`'s but never follows up on
    /// with `commit`/`abort` before `default_timeout` elapses — these would
    /// otherwise sit `Active` forever, holding whatever local state their
    /// participants allocated.
    fn timeout_checker_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(self.config.poll_interval.max(Duration::from_millis(100)));
            let expired: Vec<String> = self
                .transactions
                .lock()
                .iter()
                .filter(|(_, ctx)| {
                    let c = ctx.lock();
                    c.state == DistributedTxnState::Active && c.started_at.elapsed() >= c.timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            for transaction_id in expired {
                warn!(transaction_id, "distributed transaction timed out before commit/abort was requested");
                if let Ok(ctx) = self.lookup(&transaction_id) {
                    ctx.lock().state = DistributedTxnState::Aborting;
                    self.execute_abort_phase(&ctx);
                    self.finish(&transaction_id, CommitOutcome::Aborted);
                }
            }
        }
    }

    /// Recovery is explicitly out of scope: resolving a participant left
    /// `PREPARED` by a coordinator that crashed after deciding but before
    /// notifying everyone requires a durable decision log this coordinator
    /// doesn't keep. This loop is the hook a durable implementation would
    /// use; today it only reports that it has nothing to do.
    fn recovery_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(self.config.recovery_interval);
        }
    }
}

fn pending_participants(ctx: &Arc<Mutex<DistributedTransactionContext>>, done: ParticipantState) -> Vec<String> {
    ctx.lock()
        .participants
        .iter()
        .filter(|(_, p)| p.state != done)
        .map(|(id, _)| id.clone())
        .collect()
}
