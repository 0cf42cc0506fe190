use thiserror::Error;

/// Errors returned by [`crate::MvccManager`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MvccError {
    /// `remove` was called for a key with no version chain.
    #[error("key not found")]
    NotFound,
}
