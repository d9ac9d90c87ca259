//! Error types for hookbuf

use thiserror::Error;

/// Top-level error for queue operations that cross crate boundaries
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    PathConflict(#[from] PathConflictError),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The trim transaction kept losing races and gave up
    #[error("Queue contention: gave up after {attempts} attempts")]
    Contention { attempts: u32 },
}

/// Errors related to authenticating a caller or authorizing a queue mutation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The webhook key does not map to any owner
    #[error("invalid key")]
    UnknownKey,

    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("anonymous principals may not modify a queue")]
    Anonymous,

    #[error("principal {principal} may not modify the queue of {owner}")]
    OwnerMismatch { principal: String, owner: String },
}

/// Errors raised while validating caller input, before any mutation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `received` is the JSON rendering of what the caller sent
    #[error("path not a valid format. expected string received {received}")]
    InvalidPath { received: String },

    #[error("invalid marker: {0}")]
    InvalidMarker(String),
}

/// The apply target already exists as a directory
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("path name exists as a folder. please delete folder: {path}")]
pub struct PathConflictError {
    pub path: String,
}

impl PathConflictError {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl BufferError {
    /// Create a new Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether this error is an authorization failure
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
