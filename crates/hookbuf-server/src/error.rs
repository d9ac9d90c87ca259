//! Error types for the hookbuf service

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hookbuf_agent::AgentError;
use hookbuf_core::BufferError;
use hookbuf_storage::StorageError;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the HTTP layer and the CLI
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Unreadable request body: {0}")]
    Body(String),
}

impl ServerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Buffer(BufferError::Auth(_)) => StatusCode::FORBIDDEN,
            Self::Buffer(BufferError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Body(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Buffer(BufferError::Auth(e)) => e.to_string(),
            Self::Buffer(BufferError::Validation(e)) => e.to_string(),
            Self::PayloadTooLarge { .. } | Self::Body(_) => self.to_string(),
            _ => {
                error!(error = %self, "Request failed");
                "internal error".to_string()
            }
        };
        (status, body).into_response()
    }
}
