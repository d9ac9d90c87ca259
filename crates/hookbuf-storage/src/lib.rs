//! # hookbuf storage
//!
//! Storage for the two pieces of shared state hookbuf needs: the per-owner
//! event queues and the webhook key mapping.
//!
//! ## Features
//!
//! - **QueueReader trait**: Snapshot and change subscription, the consumer's view
//! - **QueueStore trait**: Adds append and conditional replace on top of `QueueReader`
//! - **AccessKeyStore trait**: Resolve and issue webhook keys
//! - **InMemoryQueueStore / InMemoryKeyStore**: In-memory implementations for tests and embedding
//! - **RedbStore**: redb-backed implementation of both traits for production
//! - **Acknowledger**: Optimistic trim of an applied prefix, retried on version conflicts
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hookbuf_core::{AuthProvider, BufferedEvent, OwnerId, Principal};
//! use hookbuf_storage::{Acknowledger, InMemoryQueueStore, QueueStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryQueueStore::new());
//!     let owner = OwnerId::new("u1");
//!
//!     let entry = store
//!         .append(&owner, BufferedEvent::new("notes/log.md", "hello", chrono::Utc::now()))
//!         .await
//!         .unwrap();
//!
//!     // Once applied, acknowledge everything through that event
//!     let ack = Acknowledger::new(store.clone());
//!     let principal = Principal::new(owner.clone(), AuthProvider::Token);
//!     ack.acknowledge(&principal, &entry.event.marker()).await.unwrap();
//!
//!     assert!(store.snapshot(&owner).await.unwrap().is_empty());
//! }
//! ```

pub mod ack;
pub mod error;
pub mod feed;
pub mod memory;
pub mod persistent;
pub mod queue;

// Re-exports
pub use ack::{AckConfig, Acknowledger, authorize_trim, trim_entries};
pub use error::StorageError;
pub use feed::ChangeFeed;
pub use memory::{InMemoryKeyStore, InMemoryQueueStore};
pub use persistent::{RedbStore, RedbStoreConfig};
pub use queue::{ChangeKind, QueueChange, QueueEntry, QueueHead, QueueSnapshot, QueueVersion, QueueView};

use async_trait::async_trait;
use hookbuf_core::{AccessKey, BufferedEvent, OwnerId};
use tokio::sync::broadcast;

/// Read side of the per-owner queues
///
/// This is all a consumer needs: it reads a snapshot, applies it, and waits
/// for the next change. Trimming goes through [`hookbuf_core::QueueTrimmer`].
#[async_trait]
pub trait QueueReader: Send + Sync {
    /// Read `owner`'s queue and its current version
    ///
    /// An owner that never received an event has an empty queue at version 0.
    async fn snapshot(&self, owner: &OwnerId) -> Result<QueueSnapshot, StorageError>;

    /// Subscribe to change notifications for `owner`'s queue
    fn subscribe(&self, owner: &OwnerId) -> broadcast::Receiver<QueueChange>;
}

/// Ordered per-owner event queues shared by producer and consumer
///
/// Appends and conditional replaces are the only mutations. Implementations
/// must make `compare_and_swap` atomic with respect to `append`, so that an
/// entry appended after a snapshot was taken can never be dropped by a
/// replace computed from that snapshot.
#[async_trait]
pub trait QueueStore: QueueReader {
    /// Append an event to the end of `owner`'s queue
    ///
    /// Creates the queue on first use.
    async fn append(&self, owner: &OwnerId, event: BufferedEvent)
        -> Result<QueueEntry, StorageError>;

    /// Replace `owner`'s entries if the queue is still at `expected`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if any write happened since
    /// `expected` was read; the queue is left untouched in that case.
    async fn compare_and_swap(
        &self,
        owner: &OwnerId,
        expected: QueueVersion,
        entries: Vec<QueueEntry>,
    ) -> Result<QueueVersion, StorageError>;
}

/// Mapping from webhook keys to owners
#[async_trait]
pub trait AccessKeyStore: Send + Sync {
    /// Look up the owner of `key`
    async fn resolve(&self, key: &AccessKey) -> Result<Option<OwnerId>, StorageError>;

    /// Issue a fresh key for `owner`
    ///
    /// The previous key of `owner`, if any, stops resolving.
    async fn issue(&self, owner: &OwnerId) -> Result<AccessKey, StorageError>;

    /// The currently active key of `owner`
    async fn key_for(&self, owner: &OwnerId) -> Result<Option<AccessKey>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the store traits are object-safe
    fn _assert_object_safe(_: &dyn QueueStore, _: &dyn QueueReader, _: &dyn AccessKeyStore) {}

    #[tokio::test]
    async fn test_in_memory_queue_store() {
        let store = InMemoryQueueStore::new();
        let owner = OwnerId::new("u1");

        // Initially empty
        let snapshot = store.snapshot(&owner).await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version, QueueVersion(0));

        for i in 0..3 {
            let event = BufferedEvent::new(format!("{i}.md"), "x", chrono::Utc::now());
            store.append(&owner, event).await.unwrap();
        }

        let snapshot = store.snapshot(&owner).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.version, QueueVersion(3));

        // Keep only the last entry
        let tail = snapshot.entries[2..].to_vec();
        store
            .compare_and_swap(&owner, snapshot.version, tail)
            .await
            .unwrap();
        let snapshot = store.snapshot(&owner).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.entries[0].event.target_path(), Some("2.md"));
    }
}
