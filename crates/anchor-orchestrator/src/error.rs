//! Controller error types.

use anchor_state::StateError;
use thiserror::Error;

/// Errors surfaced by Anchor operations.
#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A request body or agent response is not the JSON shape expected.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation error: {0}")]
    Operation(String),

    /// A store write failed after the remote side already acted.
    #[error("internal server error: {0}")]
    Internal(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate: {0}")]
    Duplicate(String),
}

pub type AnchorResult<T> = Result<T, AnchorError>;

impl AnchorError {
    /// HTTP status the API layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            AnchorError::NotFound(_) => 404,
            AnchorError::InvalidJson(_)
            | AnchorError::InvalidKey(_)
            | AnchorError::InvalidParam(_) => 400,
            AnchorError::Duplicate(_) => 409,
            AnchorError::Connection(_) => 503,
            AnchorError::Operation(_) | AnchorError::Internal(_) | AnchorError::Io(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AnchorError::NotFound(_))
    }

    /// Wrap a store failure that happened during reconciliation.
    pub(crate) fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        AnchorError::Internal(format!("{context}: {err}"))
    }
}

impl From<StateError> for AnchorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => AnchorError::NotFound(what),
            StateError::InvalidKey(key) => AnchorError::InvalidKey(key),
            StateError::Duplicate(key) => AnchorError::Duplicate(key),
            StateError::Connection(msg) => AnchorError::Connection(msg),
            StateError::Operation(msg) => AnchorError::Operation(msg),
        }
    }
}
