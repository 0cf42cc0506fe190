//! The engine's public error surface: storage-internal errors are retried
//! or logged at their own boundary; anything that reaches a public
//! [`crate::Engine`] method is reduced to this shape.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("key not found")]
    NotFound,

    /// A transient condition (I/O hiccup, lock contention); the caller may
    /// retry the same call.
    #[error("transient failure, retry: {0}")]
    Retry(String),

    /// The engine has been poisoned by a prior unrecoverable error.
    /// Subsequent writes short-circuit until the process restarts.
    #[error("engine is poisoned: {0}")]
    Fatal(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Retry(e.to_string())
    }
}
