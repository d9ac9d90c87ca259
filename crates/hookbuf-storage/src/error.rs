//! Error types for hookbuf-storage

use hookbuf_core::BufferError;
use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested item was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The queue changed between read and conditional write
    #[error("Queue version conflict: expected {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// A remote queue could not be reached or answered with an error
    #[error("Remote queue error: {0}")]
    Remote(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<StorageError> for BufferError {
    fn from(err: StorageError) -> Self {
        BufferError::Storage(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Database error
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    /// Whether this is a version conflict that a retry can resolve
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = StorageError::Conflict {
            expected: 3,
            actual: 4,
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("expected 3"));
        assert!(!StorageError::not_found("q").is_conflict());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }

    #[test]
    fn test_into_buffer_error() {
        let err: BufferError = StorageError::database("disk full").into();
        assert!(matches!(err, BufferError::Storage(ref msg) if msg.contains("disk full")));
    }
}
