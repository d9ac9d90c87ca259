//! Change notifications for queue watchers
//!
//! Stores publish a [`QueueChange`] after every committed mutation. A watcher
//! subscribes per owner and uses the notification as a cue to re-read the
//! queue; the notification itself carries no event data.

use dashmap::DashMap;
use hookbuf_core::OwnerId;
use tokio::sync::broadcast;
use tracing::trace;

use crate::queue::QueueChange;

/// Default per-owner notification buffer
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Per-owner broadcast of queue changes
#[derive(Debug)]
pub struct ChangeFeed {
    senders: DashMap<OwnerId, broadcast::Sender<QueueChange>>,
    capacity: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to changes of `owner`'s queue
    pub fn subscribe(&self, owner: &OwnerId) -> broadcast::Receiver<QueueChange> {
        self.senders
            .entry(owner.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish a change; dropped silently when nobody listens
    pub fn publish(&self, change: QueueChange) {
        if let Some(sender) = self.senders.get(&change.owner) {
            let delivered = sender.send(change.clone()).unwrap_or(0);
            trace!(owner = %change.owner, version = %change.version, delivered, "Published queue change");
        }
    }

    /// Number of live subscribers for `owner`
    pub fn subscriber_count(&self, owner: &OwnerId) -> usize {
        self.senders
            .get(owner)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ChangeKind, QueueVersion};

    fn change(owner: &OwnerId, version: u64) -> QueueChange {
        QueueChange {
            owner: owner.clone(),
            version: QueueVersion(version),
            kind: ChangeKind::Appended { seq: version },
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_own_owner_only() {
        let feed = ChangeFeed::default();
        let alice = OwnerId::new("alice");
        let bob = OwnerId::new("bob");
        let mut rx = feed.subscribe(&alice);
        let _bob_rx = feed.subscribe(&bob);

        feed.publish(change(&bob, 1));
        feed.publish(change(&alice, 2));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.owner, alice);
        assert_eq!(received.version, QueueVersion(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let feed = ChangeFeed::default();
        let owner = OwnerId::new("nobody");
        feed.publish(change(&owner, 1));
        assert_eq!(feed.subscriber_count(&owner), 0);
    }
}
