use thiserror::Error;

#[derive(Debug, Error)]
pub enum TpcError {
    #[error("unknown distributed transaction {0}")]
    UnknownTransaction(String),
    #[error("transaction {0} is not in a state that accepts this call")]
    InvalidState(String),
}
