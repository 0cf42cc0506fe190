//! The pluggable state machine a [`crate::RaftNode`] applies committed
//! entries to. RiptideKV's production wiring applies `command` bytes as a
//! serialized `engine::Engine` operation; tests use simple in-memory
//! stand-ins.

/// Must be `Send` since committed entries are applied from the node's main
/// loop thread.
pub trait StateMachine: Send {
    /// Applies one committed command, returning whatever response bytes
    /// the client request expects.
    fn apply(&mut self, command: &[u8]) -> Vec<u8>;
}

/// A state machine that just remembers every command it was given, handy
/// for exercising commit ordering without wiring up a real engine.
#[derive(Default)]
pub struct RecordingStateMachine {
    pub applied: Vec<Vec<u8>>,
}

impl StateMachine for RecordingStateMachine {
    fn apply(&mut self, command: &[u8]) -> Vec<u8> {
        self.applied.push(command.to_vec());
        command.to_vec()
    }
}
