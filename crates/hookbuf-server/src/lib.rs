//! # hookbuf-server
//!
//! HTTP front end of the webhook buffer. Producers `POST` payloads to a
//! per-owner key URL; the payloads are queued until the owner's agent
//! applies and acknowledges them.
//!
//! Owners read their queue with `GET /queue`, wait for changes with
//! `GET /queue/changes` and acknowledge with `POST /wipe`, so an agent can
//! consume a queue from another process through
//! [`hookbuf_agent::RemoteQueue`].
//!
//! The crate also hosts the `hookbuf` binary, which can serve, issue keys,
//! drain a queue into a vault (locally or from a running server), watch a
//! running server and clear a queue.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod ingest;

pub use app::{App, Stores};
pub use auth::{Authenticator, StaticAuthenticator, bearer_token};
pub use config::{AckSettings, EmbeddedAgentConfig, PrincipalEntry, ServerConfig};
pub use error::ServerError;
pub use http::{
    AppState, ChangesQuery, DEFAULT_CHANGE_WAIT_MS, MAX_CHANGE_WAIT_MS, build_router, path_param,
};
pub use ingest::Ingestion;
