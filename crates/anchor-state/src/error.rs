//! Error types for the Anchor state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The database could not be opened or a transaction could not begin/commit.
    #[error("database connection error: {0}")]
    Connection(String),

    /// A table, read, write or (de)serialization step failed.
    #[error("database operation error: {0}")]
    Operation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),
}

impl StateError {
    /// Whether this error reports a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }
}
