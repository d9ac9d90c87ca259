//! Per-owner queue shapes
//!
//! A queue is an ordered list of [`QueueEntry`] values. Each entry carries an
//! insertion key (`seq`) that only ever grows for a given owner, so the list
//! order and the key order always agree. Every mutation bumps the queue's
//! [`QueueVersion`], which is what conditional writes compare against.

use std::fmt;

use hookbuf_core::{BufferedEvent, OwnerId};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Version token of an owner's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueVersion(pub u64);

impl fmt::Display for QueueVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One queued event and its insertion key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub seq: u64,
    pub event: BufferedEvent,
}

/// Point-in-time read of an owner's queue
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: QueueVersion,
    pub entries: Vec<QueueEntry>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Events in queue order
    pub fn events(&self) -> impl Iterator<Item = &BufferedEvent> {
        self.entries.iter().map(|entry| &entry.event)
    }
}

/// A snapshot labelled with the queue's owner, as served over HTTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueView {
    pub owner: OwnerId,
    #[serde(flatten)]
    pub snapshot: QueueSnapshot,
}

/// Version and length of a queue without its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHead {
    pub version: QueueVersion,
    pub remaining: usize,
}

impl From<&QueueSnapshot> for QueueHead {
    fn from(snapshot: &QueueSnapshot) -> Self {
        Self {
            version: snapshot.version,
            remaining: snapshot.len(),
        }
    }
}

/// What happened to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new entry was appended
    Appended { seq: u64 },
    /// The whole entry list was replaced by a conditional write
    Replaced { remaining: usize },
    /// A remote queue was seen at a new version; the mutation itself is unknown
    Polled { remaining: usize },
}

/// Notification published after every committed queue mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueChange {
    pub owner: OwnerId,
    pub version: QueueVersion,
    pub kind: ChangeKind,
}

/// Stored form of a queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct QueueRecord {
    pub version: u64,
    /// Next insertion key; survives trims so keys are never reused
    pub next_seq: u64,
    pub entries: Vec<QueueEntry>,
}

impl QueueRecord {
    pub fn push(&mut self, event: BufferedEvent) -> QueueEntry {
        let entry = QueueEntry {
            seq: self.next_seq,
            event,
        };
        self.next_seq += 1;
        self.version += 1;
        self.entries.push(entry.clone());
        entry
    }

    /// Replace the entry list if nobody wrote since `expected` was read
    pub fn replace(
        &mut self,
        expected: QueueVersion,
        entries: Vec<QueueEntry>,
    ) -> Result<QueueVersion, StorageError> {
        if self.version != expected.0 {
            return Err(StorageError::Conflict {
                expected: expected.0,
                actual: self.version,
            });
        }
        self.entries = entries;
        self.version += 1;
        Ok(QueueVersion(self.version))
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            version: QueueVersion(self.version),
            entries: self.entries.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Deserialization(e.to_string()))
    }
}
