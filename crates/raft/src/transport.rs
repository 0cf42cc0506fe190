//! Message delivery between nodes. [`ChannelTransport`] is an in-memory,
//! single-process stand-in (mirroring the teacher's `SimpleRaftNetwork`)
//! good for tests and for running a full cluster inside one binary; a real
//! deployment would swap in a transport backed by actual sockets without
//! touching [`crate::RaftNode`].

use crate::types::{Envelope, RaftMessage};
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait Transport: Send + Sync {
    /// Registers the channel a node wants to receive envelopes on.
    fn register(&self, node_id: &str, inbound: Sender<Envelope>);

    /// Best-effort delivery of `message` from `from` to `to`. Silently
    /// drops the message if `to` is not registered (an unreachable peer).
    fn send(&self, to: &str, from: &str, message: RaftMessage);
}

#[derive(Default)]
pub struct ChannelTransport {
    nodes: RwLock<HashMap<String, Sender<Envelope>>>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for ChannelTransport {
    fn register(&self, node_id: &str, inbound: Sender<Envelope>) {
        self.nodes.write().insert(node_id.to_string(), inbound);
    }

    fn send(&self, to: &str, from: &str, message: RaftMessage) {
        if let Some(sender) = self.nodes.read().get(to) {
            let _ = sender.send(Envelope {
                from: from.to_string(),
                message,
            });
        }
    }
}
