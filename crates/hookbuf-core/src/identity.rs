//! Owner identities, webhook access keys, and authenticated principals
//!
//! An [`OwnerId`] names the queue (and document store) events belong to.
//! Producers prove which queue they may append to with an opaque
//! [`AccessKey`]; consumers and operators act as a [`Principal`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of random bytes in an issued access key (48 hex chars)
pub const ACCESS_KEY_BYTES: usize = 24;

/// Identity of a queue owner
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OwnerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque webhook key
///
/// `Debug` only shows a short prefix so keys do not end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessKey(String);

impl AccessKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; ACCESS_KEY_BYTES]>()))
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for logging
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessKey({}…)", self.short())
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a principal signed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// Unauthenticated session; may read but never trim
    #[default]
    Anonymous,
    /// Bearer token issued to a consumer agent
    Token,
    Password,
    /// Third-party identity provider
    Federated,
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub owner: OwnerId,
    pub provider: AuthProvider,
}

impl Principal {
    pub fn new(owner: impl Into<OwnerId>, provider: AuthProvider) -> Self {
        Self {
            owner: owner.into(),
            provider,
        }
    }

    pub fn anonymous(owner: impl Into<OwnerId>) -> Self {
        Self::new(owner, AuthProvider::Anonymous)
    }

    pub fn is_anonymous(&self) -> bool {
        self.provider == AuthProvider::Anonymous
    }
}
