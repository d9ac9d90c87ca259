//! Error types for the apply agent

use hookbuf_core::{AuthError, BufferError, OwnerId, PathConflictError, ValidationError};
use hookbuf_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while applying or acknowledging a batch
#[derive(Debug, Error)]
pub enum AgentError {
    /// The target path is an existing directory
    #[error(transparent)]
    PathConflict(#[from] PathConflictError),

    /// I/O against the document store failed
    #[error("Target store error at {path}: {message}")]
    Target { path: String, message: String },

    /// The event path cannot be mapped into the document store
    #[error("Invalid target path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Queue read failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Acknowledgment failed
    #[error("Trim failed: {0}")]
    Trim(#[from] BufferError),

    #[error("Already watching owner {0}")]
    AlreadyWatching(OwnerId),

    /// The hookbuf server could not be reached or refused a request
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Failure of a request against a hookbuf server
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// 403: the token is missing, unknown or anonymous
    #[error("Server refused the token: {0}")]
    Forbidden(String),

    /// 422: the request body was rejected
    #[error("Server rejected the request: {0}")]
    Rejected(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The token belongs to a different owner than the one asked for
    #[error("Token of {token_owner} cannot read the queue of {owner}")]
    WrongOwner { owner: OwnerId, token_owner: OwnerId },
}

impl From<RemoteError> for StorageError {
    fn from(err: RemoteError) -> Self {
        StorageError::Remote(err.to_string())
    }
}

impl From<RemoteError> for BufferError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Forbidden(_) => AuthError::InvalidCredentials.into(),
            RemoteError::Rejected(body) => {
                let reason = body.strip_prefix("invalid marker: ").unwrap_or(&body);
                ValidationError::InvalidMarker(reason.to_string()).into()
            }
            RemoteError::WrongOwner { owner, token_owner } => AuthError::OwnerMismatch {
                principal: token_owner.to_string(),
                owner: owner.to_string(),
            }
            .into(),
            other => BufferError::Storage(other.to_string()),
        }
    }
}

impl AgentError {
    pub(crate) fn target(path: &str, err: impl std::fmt::Display) -> Self {
        Self::Target {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
