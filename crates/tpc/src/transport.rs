//! Message delivery between a coordinator and its participants. Mirrors
//! `raft::ChannelTransport` — an in-memory, single-process registry good
//! for tests and single-binary deployments; a networked transport would
//! implement the same trait without the coordinator or participant code
//! changing.

use crate::types::TwoPhaseMessage;
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait Transport: Send + Sync {
    fn register(&self, node_id: &str, inbound: Sender<TwoPhaseMessage>);
    fn send(&self, to: &str, message: TwoPhaseMessage);
}

#[derive(Default)]
pub struct ChannelTransport {
    nodes: RwLock<HashMap<String, Sender<TwoPhaseMessage>>>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for ChannelTransport {
    fn register(&self, node_id: &str, inbound: Sender<TwoPhaseMessage>) {
        self.nodes.write().insert(node_id.to_string(), inbound);
    }

    fn send(&self, to: &str, message: TwoPhaseMessage) {
        if let Some(sender) = self.nodes.read().get(to) {
            let _ = sender.send(message);
        }
    }
}
