use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("this node is not the leader; last known leader: {0:?}")]
    NotLeader(Option<String>),

    #[error("client request timed out waiting for commit")]
    Timeout,
}
