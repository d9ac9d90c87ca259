//! Configuration for the apply agent

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Line terminator appended to every payload before it is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Payloads are concatenated as-is
    #[default]
    None,
    /// `\n`
    Unix,
    /// `\r\n`
    Windows,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Unix => "\n",
            Self::Windows => "\r\n",
        }
    }
}

/// Configuration for an apply agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root of the document store
    pub vault_dir: PathBuf,
    /// Terminator appended to each payload
    pub line_ending: LineEnding,
    /// Delay before resubscribing after a failed batch
    pub retry_delay_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            vault_dir: PathBuf::from("./vault"),
            line_ending: LineEnding::None,
            retry_delay_secs: 5,
        }
    }
}

impl AgentConfig {
    /// Create a configuration with a custom vault directory
    pub fn with_vault_dir(vault_dir: impl Into<PathBuf>) -> Self {
        Self {
            vault_dir: vault_dir.into(),
            ..Self::default()
        }
    }

    /// Set the line terminator
    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    /// Set the retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_secs = delay.as_secs();
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Connection to a hookbuf server, for agents running in their own process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the server, e.g. `http://127.0.0.1:8787`
    pub server_url: String,
    /// Bearer token of the owner whose queue is consumed
    pub token: String,
    /// How long the server may hold a change poll open
    pub poll_wait_ms: u64,
    /// Delay before polling again after a failed poll
    pub retry_delay_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".to_string(),
            token: String::new(),
            poll_wait_ms: 25_000,
            retry_delay_ms: 1_000,
        }
    }
}

impl RemoteConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endings() {
        assert_eq!(LineEnding::None.as_str(), "");
        assert_eq!(LineEnding::Unix.as_str(), "\n");
        assert_eq!(LineEnding::Windows.as_str(), "\r\n");
    }

    #[test]
    fn test_config_from_toml() {
        let config: AgentConfig = toml::from_str(
            r#"
            vault_dir = "/srv/vault"
            line_ending = "windows"
            "#,
        )
        .unwrap();
        assert_eq!(config.vault_dir, PathBuf::from("/srv/vault"));
        assert_eq!(config.line_ending, LineEnding::Windows);
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_remote_config_defaults() {
        let config: RemoteConfig = toml::from_str(
            r#"
            server_url = "http://hooks.internal:9000"
            token = "t1"
            "#,
        )
        .unwrap();
        assert_eq!(config.server_url, "http://hooks.internal:9000");
        assert_eq!(config.poll_wait(), Duration::from_secs(25));
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
    }
}
