//! In-memory storage implementations
//!
//! This module provides in-memory implementations of the storage traits,
//! suitable for tests and for running producer and consumer in one process.

use async_trait::async_trait;
use dashmap::DashMap;
use hookbuf_core::{AccessKey, BufferedEvent, OwnerId};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::StorageError;
use crate::feed::ChangeFeed;
use crate::queue::{ChangeKind, QueueChange, QueueEntry, QueueRecord, QueueSnapshot, QueueVersion};
use crate::{AccessKeyStore, QueueReader, QueueStore};

/// In-memory implementation of QueueStore
///
/// Uses `DashMap` for concurrent access to per-owner queues. Each mutation
/// holds the owner's shard lock for the whole read-check-write, which is
/// what makes `compare_and_swap` atomic against concurrent appends.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    queues: DashMap<OwnerId, QueueRecord>,
    feed: ChangeFeed,
}

impl InMemoryQueueStore {
    /// Create a new in-memory queue store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a custom per-owner notification buffer
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            feed: ChangeFeed::new(capacity),
        }
    }

    /// Number of owners that have a queue (empty or not)
    pub fn owner_count(&self) -> usize {
        self.queues.len()
    }

    /// Total events across all queues
    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(|q| q.entries.len()).sum()
    }
}

#[async_trait]
impl QueueReader for InMemoryQueueStore {
    async fn snapshot(&self, owner: &OwnerId) -> Result<QueueSnapshot, StorageError> {
        Ok(self
            .queues
            .get(owner)
            .map(|record| record.snapshot())
            .unwrap_or_default())
    }

    fn subscribe(&self, owner: &OwnerId) -> broadcast::Receiver<QueueChange> {
        self.feed.subscribe(owner)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn append(
        &self,
        owner: &OwnerId,
        event: BufferedEvent,
    ) -> Result<QueueEntry, StorageError> {
        let (entry, version) = {
            let mut record = self.queues.entry(owner.clone()).or_default();
            let entry = record.push(event);
            (entry, record.version)
        };
        trace!(owner = %owner, seq = entry.seq, event_id = %entry.event.id, "Appended event");

        self.feed.publish(QueueChange {
            owner: owner.clone(),
            version: QueueVersion(version),
            kind: ChangeKind::Appended { seq: entry.seq },
        });
        Ok(entry)
    }

    async fn compare_and_swap(
        &self,
        owner: &OwnerId,
        expected: QueueVersion,
        entries: Vec<QueueEntry>,
    ) -> Result<QueueVersion, StorageError> {
        let remaining = entries.len();
        let version = {
            let mut record = self.queues.entry(owner.clone()).or_default();
            record.replace(expected, entries)?
        };
        debug!(owner = %owner, version = %version, remaining, "Replaced queue entries");

        self.feed.publish(QueueChange {
            owner: owner.clone(),
            version,
            kind: ChangeKind::Replaced { remaining },
        });
        Ok(version)
    }
}

/// In-memory implementation of AccessKeyStore
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    /// key -> owner
    keys: DashMap<String, OwnerId>,
    /// owner -> active key
    owners: DashMap<OwnerId, AccessKey>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a known key for `owner`, revoking any previous one
    pub fn assign(&self, owner: &OwnerId, key: AccessKey) {
        if let Some(previous) = self.owners.insert(owner.clone(), key.clone()) {
            self.keys.remove(previous.as_str());
        }
        self.keys.insert(key.as_str().to_string(), owner.clone());
    }
}

#[async_trait]
impl AccessKeyStore for InMemoryKeyStore {
    async fn resolve(&self, key: &AccessKey) -> Result<Option<OwnerId>, StorageError> {
        Ok(self.keys.get(key.as_str()).map(|owner| owner.clone()))
    }

    async fn issue(&self, owner: &OwnerId) -> Result<AccessKey, StorageError> {
        let key = AccessKey::generate();
        self.assign(owner, key.clone());
        debug!(owner = %owner, key = key.short(), "Issued access key");
        Ok(key)
    }

    async fn key_for(&self, owner: &OwnerId) -> Result<Option<AccessKey>, StorageError> {
        Ok(self.owners.get(owner).map(|key| key.clone()))
    }
}
