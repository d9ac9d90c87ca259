//! redb-backed persistent storage
//!
//! One database file holds three tables:
//!
//! - `keys`: access key -> owner id
//! - `users`: owner id -> active access key
//! - `buffer`: owner id -> JSON-encoded queue record
//!
//! redb serializes write transactions, so the read-check-write of a
//! conditional replace runs inside one write transaction and cannot
//! interleave with an append.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hookbuf_core::{AccessKey, BufferedEvent, OwnerId};
use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace};

use crate::error::StorageError;
use crate::feed::{ChangeFeed, DEFAULT_FEED_CAPACITY};
use crate::queue::{ChangeKind, QueueChange, QueueEntry, QueueRecord, QueueSnapshot, QueueVersion};
use crate::{AccessKeyStore, QueueReader, QueueStore};

// Key: access key, Value: owner id
const ACCESS_KEYS: TableDefinition<&str, &str> = TableDefinition::new("keys");

// Key: owner id, Value: active access key
const OWNER_KEYS: TableDefinition<&str, &str> = TableDefinition::new("users");

// Key: owner id, Value: JSON-encoded QueueRecord
const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("buffer");

/// Configuration for redb storage
#[derive(Debug, Clone)]
pub struct RedbStoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Per-owner change notification buffer
    pub feed_capacity: usize,
}

impl Default for RedbStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/hookbuf.redb"),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl RedbStoreConfig {
    /// Config for a database file at `db_path`
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

/// Persistent implementation of QueueStore and AccessKeyStore
pub struct RedbStore {
    db: Arc<Database>,
    feed: ChangeFeed,
    config: RedbStoreConfig,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("db_path", &self.config.db_path)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStoreConfig) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path).map_err(StorageError::database)?;

        info!("Opened queue database");

        let store = Self {
            db: Arc::new(db),
            feed: ChangeFeed::new(config.feed_capacity),
            config,
        };

        store.init_tables()?;

        Ok(store)
    }

    /// Create tables if they don't exist
    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;

        write_txn
            .open_table(ACCESS_KEYS)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(OWNER_KEYS)
            .map_err(StorageError::database)?;
        write_txn.open_table(QUEUES).map_err(StorageError::database)?;

        write_txn.commit().map_err(StorageError::database)?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStoreConfig {
        &self.config
    }

    fn read_record(&self, owner: &OwnerId) -> Result<QueueRecord, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn.open_table(QUEUES).map_err(StorageError::database)?;

        let bytes = table
            .get(owner.as_str())
            .map_err(StorageError::database)?
            .map(|v| v.value().to_vec());

        match bytes {
            Some(bytes) => QueueRecord::decode(&bytes),
            None => Ok(QueueRecord::default()),
        }
    }

    /// Load, mutate, and store `owner`'s record in one write transaction
    ///
    /// The transaction is dropped uncommitted if `mutate` fails.
    fn update_record<T>(
        &self,
        owner: &OwnerId,
        mutate: impl FnOnce(&mut QueueRecord) -> Result<T, StorageError>,
    ) -> Result<(T, u64), StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;

        let (result, version) = {
            let mut table = write_txn.open_table(QUEUES).map_err(StorageError::database)?;

            let existing = table
                .get(owner.as_str())
                .map_err(StorageError::database)?
                .map(|v| v.value().to_vec());
            let mut record = match existing {
                Some(bytes) => QueueRecord::decode(&bytes)?,
                None => QueueRecord::default(),
            };

            let result = mutate(&mut record)?;
            let bytes = record.encode()?;
            table
                .insert(owner.as_str(), bytes.as_slice())
                .map_err(StorageError::database)?;
            (result, record.version)
        };

        write_txn.commit().map_err(StorageError::database)?;
        Ok((result, version))
    }
}

#[async_trait]
impl QueueReader for RedbStore {
    async fn snapshot(&self, owner: &OwnerId) -> Result<QueueSnapshot, StorageError> {
        Ok(self.read_record(owner)?.snapshot())
    }

    fn subscribe(&self, owner: &OwnerId) -> broadcast::Receiver<QueueChange> {
        self.feed.subscribe(owner)
    }
}

#[async_trait]
impl QueueStore for RedbStore {
    async fn append(
        &self,
        owner: &OwnerId,
        event: BufferedEvent,
    ) -> Result<QueueEntry, StorageError> {
        let (entry, version) = self.update_record(owner, |record| Ok(record.push(event)))?;
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
        let (version, _) =
            self.update_record(owner, |record| record.replace(expected, entries))?;
        debug!(owner = %owner, version = %version, remaining, "Replaced queue entries");

        self.feed.publish(QueueChange {
            owner: owner.clone(),
            version,
            kind: ChangeKind::Replaced { remaining },
        });
        Ok(version)
    }
}

#[async_trait]
impl AccessKeyStore for RedbStore {
    async fn resolve(&self, key: &AccessKey) -> Result<Option<OwnerId>, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(ACCESS_KEYS)
            .map_err(StorageError::database)?;

        let owner = table
            .get(key.as_str())
            .map_err(StorageError::database)?
            .map(|v| OwnerId::new(v.value()));

        Ok(owner)
    }

    async fn issue(&self, owner: &OwnerId) -> Result<AccessKey, StorageError> {
        let key = AccessKey::generate();
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;

        {
            let mut owners = write_txn
                .open_table(OWNER_KEYS)
                .map_err(StorageError::database)?;
            let previous = owners
                .insert(owner.as_str(), key.as_str())
                .map_err(StorageError::database)?
                .map(|v| v.value().to_string());

            let mut keys = write_txn
                .open_table(ACCESS_KEYS)
                .map_err(StorageError::database)?;
            if let Some(previous) = previous {
                keys.remove(previous.as_str())
                    .map_err(StorageError::database)?;
            }
            keys.insert(key.as_str(), owner.as_str())
                .map_err(StorageError::database)?;
        }

        write_txn.commit().map_err(StorageError::database)?;

        debug!(owner = %owner, key = key.short(), "Issued access key");
        Ok(key)
    }

    async fn key_for(&self, owner: &OwnerId) -> Result<Option<AccessKey>, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(OWNER_KEYS)
            .map_err(StorageError::database)?;

        let key = table
            .get(owner.as_str())
            .map_err(StorageError::database)?
            .map(|v| AccessKey::new(v.value()));

        Ok(key)
    }
}

impl RedbStore {
    /// Owner ids with a stored queue, in key order
    pub fn owners(&self) -> Result<Vec<OwnerId>, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn.open_table(QUEUES).map_err(StorageError::database)?;

        let mut owners = Vec::new();
        for item in table.iter().map_err(StorageError::database)? {
            let (key, _) = item.map_err(StorageError::database)?;
            owners.push(OwnerId::new(key.value()));
        }
        Ok(owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RedbStore {
        RedbStore::open(RedbStoreConfig::with_path(dir.path().join("hookbuf.redb"))).unwrap()
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::new("u1");

        {
            let store = open(&dir);
            store
                .append(&owner, BufferedEvent::new("a.md", "1", Utc::now()))
                .await
                .unwrap();
            store
                .append(&owner, BufferedEvent::new("b.md", "2", Utc::now()))
                .await
                .unwrap();
        }

        let store = open(&dir);
        let snapshot = store.snapshot(&owner).await.unwrap();
        assert_eq!(snapshot.version, QueueVersion(2));
        let paths: Vec<_> = snapshot.events().filter_map(|e| e.target_path()).collect();
        assert_eq!(paths, ["a.md", "b.md"]);
        assert_eq!(store.owners().unwrap(), vec![owner]);
    }

    #[tokio::test]
    async fn test_conflicting_swap_leaves_queue_untouched() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let owner = OwnerId::new("u1");

        store
            .append(&owner, BufferedEvent::new("a.md", "1", Utc::now()))
            .await
            .unwrap();
        let stale = store.snapshot(&owner).await.unwrap();
        store
            .append(&owner, BufferedEvent::new("b.md", "2", Utc::now()))
            .await
            .unwrap();

        let err = store
            .compare_and_swap(&owner, stale.version, Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let current = store.snapshot(&owner).await.unwrap();
        assert_eq!(current.len(), 2);
        assert_eq!(current.version, QueueVersion(2));
    }

    #[tokio::test]
    async fn test_keys_persist_and_rotate() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::new("u1");
        let (old, new) = {
            let store = open(&dir);
            let old = store.issue(&owner).await.unwrap();
            let new = store.issue(&owner).await.unwrap();
            (old, new)
        };

        let store = open(&dir);
        assert_eq!(store.resolve(&new).await.unwrap(), Some(owner.clone()));
        assert_eq!(store.resolve(&old).await.unwrap(), None);
        assert_eq!(store.key_for(&owner).await.unwrap(), Some(new));
    }
}
