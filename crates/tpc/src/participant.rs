//! The participant side of 2PC: on `PREPARE`, opens a local transaction
//! through `txn::TransactionManager`, stages the requested operations, and
//! replies `PREPARE_OK`/`PREPARE_ABORT`. The local transaction is left
//! open (locks held, under `Serializable`) until `COMMIT` or `ABORT`
//! arrives — an in-doubt participant is simply one whose local transaction
//! is still sitting there, blocking anyone who needs the same keys.

use crate::clock::now_ms;
use crate::transport::Transport;
use crate::types::{OperationKind, TwoPhaseMessage, TwoPhaseMessageType};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use txn::{IsolationLevel, TransactionManager};

pub struct Participant {
    node_id: String,
    txn_manager: Arc<TransactionManager>,
    local_txns: Mutex<HashMap<String, u64>>,
    transport: Arc<dyn Transport>,
    inbound_tx: Sender<TwoPhaseMessage>,
    inbound_rx: Receiver<TwoPhaseMessage>,
    running: AtomicBool,
}

impl Participant {
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        txn_manager: Arc<TransactionManager>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let participant = Arc::new(Self {
            node_id: node_id.into(),
            txn_manager,
            local_txns: Mutex::new(HashMap::new()),
            transport,
            inbound_tx,
            inbound_rx,
            running: AtomicBool::new(false),
        });
        participant
            .transport
            .register(&participant.node_id, participant.inbound_tx.clone());
        participant
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let worker = self.clone();
        std::thread::spawn(move || worker.main_loop());
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn main_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.inbound_rx.recv_timeout(Duration::from_millis(20)) {
                Ok(message) => {
                    let reply = self.handle_message(&message);
                    self.transport.send(&message.coordinator_id, reply);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Processes one inbound message and returns the reply to send back to
    /// the coordinator. Exposed directly (not just via [`Participant::start`])
    /// so tests and synchronous callers can drive the protocol without a
    /// background thread.
    pub fn handle_message(&self, message: &TwoPhaseMessage) -> TwoPhaseMessage {
        match message.message_type {
            TwoPhaseMessageType::Prepare => self.handle_prepare(message),
            TwoPhaseMessageType::Commit => self.handle_commit(message),
            TwoPhaseMessageType::Abort => self.handle_abort(message),
            other => {
                warn!(node = %self.node_id, ?other, "participant received an unexpected message type");
                self.reply(message, TwoPhaseMessageType::AbortOk, Some("unexpected message type".into()))
            }
        }
    }

    fn handle_prepare(&self, message: &TwoPhaseMessage) -> TwoPhaseMessage {
        let ctx = self.txn_manager.begin(IsolationLevel::Serializable);
        let mut failure = None;

        for op in &message.operations {
            let result = match op.kind {
                OperationKind::Write => self
                    .txn_manager
                    .put(ctx.txn_id, op.key.clone(), op.value.clone().unwrap_or_default()),
                OperationKind::Delete => self.txn_manager.delete(ctx.txn_id, op.key.clone()),
                OperationKind::Read => self.txn_manager.get(ctx.txn_id, &op.key).map(|_| ()),
            };
            if let Err(e) = result {
                failure = Some(e.to_string());
                break;
            }
        }

        match failure {
            None => {
                self.local_txns
                    .lock()
                    .insert(message.transaction_id.clone(), ctx.txn_id);
                info!(node = %self.node_id, transaction_id = %message.transaction_id, "prepared");
                self.reply(message, TwoPhaseMessageType::PrepareOk, None)
            }
            Some(error) => {
                let _ = self.txn_manager.abort(ctx.txn_id);
                warn!(node = %self.node_id, transaction_id = %message.transaction_id, %error, "prepare failed");
                self.reply(message, TwoPhaseMessageType::PrepareAbort, Some(error))
            }
        }
    }

    fn handle_commit(&self, message: &TwoPhaseMessage) -> TwoPhaseMessage {
        let local_txn_id = self.local_txns.lock().remove(&message.transaction_id);
        match local_txn_id {
            Some(txn_id) => match self.txn_manager.commit(txn_id) {
                Ok(true) => {
                    info!(node = %self.node_id, transaction_id = %message.transaction_id, "committed");
                    self.reply(message, TwoPhaseMessageType::CommitOk, None)
                }
                Ok(false) => {
                    warn!(node = %self.node_id, transaction_id = %message.transaction_id, "local commit validation failed after prepare");
                    self.reply(message, TwoPhaseMessageType::CommitOk, Some("local commit rolled back".into()))
                }
                Err(e) => self.reply(message, TwoPhaseMessageType::CommitOk, Some(e.to_string())),
            },
            // No open local transaction for this id: either a duplicate
            // COMMIT after we already replied, or a restart. Either way
            // there's nothing left to do but acknowledge.
            None => self.reply(message, TwoPhaseMessageType::CommitOk, None),
        }
    }

    fn handle_abort(&self, message: &TwoPhaseMessage) -> TwoPhaseMessage {
        if let Some(txn_id) = self.local_txns.lock().remove(&message.transaction_id) {
            let _ = self.txn_manager.abort(txn_id);
            info!(node = %self.node_id, transaction_id = %message.transaction_id, "aborted");
        }
        self.reply(message, TwoPhaseMessageType::AbortOk, None)
    }

    fn reply(
        &self,
        request: &TwoPhaseMessage,
        message_type: TwoPhaseMessageType,
        error_message: Option<String>,
    ) -> TwoPhaseMessage {
        TwoPhaseMessage {
            message_type,
            transaction_id: request.transaction_id.clone(),
            coordinator_id: request.coordinator_id.clone(),
            participant_id: self.node_id.clone(),
            operations: Vec::new(),
            error_message,
            timestamp_ms: now_ms(),
        }
    }
}
