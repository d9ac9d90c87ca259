//! Webhook ingestion: authenticate the key, validate the path, enqueue

use std::sync::Arc;

use hookbuf_core::{
    AccessKey, AuthError, BufferError, BufferedEvent, Clock, OwnerId, SystemClock,
    resolve_path_param,
};
use hookbuf_storage::{AccessKeyStore, QueueEntry, QueueStore};
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Appends authenticated webhook payloads to their owner's queue
pub struct Ingestion {
    keys: Arc<dyn AccessKeyStore>,
    queue: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
}

impl Ingestion {
    pub fn new(keys: Arc<dyn AccessKeyStore>, queue: Arc<dyn QueueStore>) -> Self {
        Self {
            keys,
            queue,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a specific clock for expiry stamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enqueue one webhook payload
    ///
    /// The key is checked before the path, and nothing is written unless
    /// both are valid.
    ///
    /// # Errors
    ///
    /// - [`BufferError::Auth`] if `key` does not resolve to an owner
    /// - [`BufferError::Validation`] if `path` is neither a string nor an
    ///   array starting with one
    pub async fn ingest(
        &self,
        key: &AccessKey,
        path: Option<&Value>,
        body: &[u8],
    ) -> Result<QueueEntry, BufferError> {
        let owner = self.resolve_owner(key).await?;
        self.enqueue(&owner, path, body).await
    }

    /// Owner a webhook key belongs to
    #[instrument(skip_all, fields(key = %key.short()))]
    pub async fn resolve_owner(&self, key: &AccessKey) -> Result<OwnerId, BufferError> {
        match self.keys.resolve(key).await? {
            Some(owner) => Ok(owner),
            None => {
                warn!("Rejected webhook with unknown key");
                Err(AuthError::UnknownKey.into())
            }
        }
    }

    /// Validate `path` and append the payload to `owner`'s queue
    pub async fn enqueue(
        &self,
        owner: &OwnerId,
        path: Option<&Value>,
        body: &[u8],
    ) -> Result<QueueEntry, BufferError> {
        let path = resolve_path_param(path)?;
        let data = String::from_utf8_lossy(body).into_owned();
        let event = BufferedEvent::new(path, data, self.clock.now_utc());

        let entry = self.queue.append(owner, event).await?;
        debug!(
            owner = %owner,
            seq = entry.seq,
            event_id = %entry.event.id,
            path = entry.event.target_path().unwrap_or_default(),
            "Queued webhook"
        );
        Ok(entry)
    }
}
