//! Service configuration, loaded from TOML
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! working in-memory server on `127.0.0.1:8787`.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8787"
//! data_dir = "/var/lib/hookbuf"
//!
//! [[principals]]
//! token = "s3cret"
//! owner = "alice"
//!
//! [agent]
//! vault_dir = "/home/alice/vault"
//! owners = ["alice"]
//! line_ending = "unix"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hookbuf_agent::AgentConfig;
use hookbuf_core::{AuthProvider, OwnerId, Principal};
use hookbuf_logging::LogConfig;
use hookbuf_storage::AckConfig;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Default request body limit (16 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// File name of the queue database inside `data_dir`
pub const DB_FILE_NAME: &str = "hookbuf.redb";

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Directory for the queue database; in-memory stores when absent
    pub data_dir: Option<PathBuf>,
    /// Largest accepted webhook body
    pub max_body_bytes: usize,
    /// Trim retry policy
    pub ack: AckSettings,
    /// Bearer tokens accepted by the acknowledgment endpoint
    pub principals: Vec<PrincipalEntry>,
    /// Watchers to run inside the server process
    pub agent: Option<EmbeddedAgentConfig>,
    pub logging: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            data_dir: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            ack: AckSettings::default(),
            principals: Vec::new(),
            agent: None,
            logging: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ServerError> {
        toml::from_str(text).map_err(|e| ServerError::config(e.to_string()))
    }

    /// Set the listen address
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    /// Persist queues under `data_dir`
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Accept `token` as `owner`
    pub fn with_principal(mut self, token: impl Into<String>, owner: impl Into<OwnerId>) -> Self {
        self.principals.push(PrincipalEntry {
            token: token.into(),
            owner: owner.into(),
            provider: AuthProvider::Token,
        });
        self
    }

    /// Run watchers for `owners` inside the server
    pub fn with_agent(mut self, agent: AgentConfig, owners: Vec<OwnerId>) -> Self {
        self.agent = Some(EmbeddedAgentConfig { agent, owners });
        self
    }

    /// Location of the queue database, if persistent
    pub fn db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(DB_FILE_NAME))
    }
}

/// Trim retry policy in config-file units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AckSettings {
    pub max_attempts: Option<u32>,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AckSettings {
    fn default() -> Self {
        let defaults = AckConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_backoff_ms: defaults.base_backoff.as_millis() as u64,
            max_backoff_ms: defaults.max_backoff.as_millis() as u64,
        }
    }
}

impl From<&AckSettings> for AckConfig {
    fn from(settings: &AckSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

/// A bearer token and the principal it stands for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalEntry {
    pub token: String,
    pub owner: OwnerId,
    #[serde(default = "default_provider")]
    pub provider: AuthProvider,
}

fn default_provider() -> AuthProvider {
    AuthProvider::Token
}

impl PrincipalEntry {
    pub fn principal(&self) -> Principal {
        Principal::new(self.owner.clone(), self.provider)
    }
}

/// Agent settings plus the owners to watch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedAgentConfig {
    #[serde(flatten)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub owners: Vec<OwnerId>,
}
