//! Optimistic trim of an owner's queue
//!
//! The consumer applies a snapshot of the queue and then asks to drop what
//! it applied. Producers may have appended more events in the meantime, so
//! the trim is a read-modify-write against the *current* queue: find the
//! marker, keep everything strictly after it, and write back conditioned on
//! the queue version not having moved. A lost race just means another lap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hookbuf_core::{AuthError, BufferError, Marker, OwnerId, Principal, QueueTrimmer, TrimOutcome};
use tracing::{debug, info, instrument, warn};

use crate::{QueueReader, QueueStore};
use crate::error::StorageError;
use crate::queue::QueueEntry;

/// Retry policy for the trim transaction
#[derive(Debug, Clone)]
pub struct AckConfig {
    /// Give up after this many conflicting attempts; `None` retries until commit
    pub max_attempts: Option<u32>,
    /// Delay after the first conflict, doubled per further conflict
    pub base_backoff: Duration,
    /// Upper bound for the delay between attempts
    pub max_backoff: Duration,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl AckConfig {
    /// Backoff before attempt `attempt + 1`
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Check that `principal` may trim `owner`'s queue
///
/// Only the owner, signed in with something other than an anonymous session.
pub fn authorize_trim(principal: &Principal, owner: &OwnerId) -> Result<(), AuthError> {
    if principal.is_anonymous() {
        return Err(AuthError::Anonymous);
    }
    if &principal.owner != owner {
        return Err(AuthError::OwnerMismatch {
            principal: principal.owner.to_string(),
            owner: owner.to_string(),
        });
    }
    Ok(())
}

/// Entries that survive a trim through `marker`
///
/// A marker that is not in `entries` (already trimmed, or cleared) leaves
/// them unchanged.
pub fn trim_entries(entries: Vec<QueueEntry>, marker: &Marker) -> Vec<QueueEntry> {
    match marker {
        Marker::ClearAll => Vec::new(),
        Marker::Through(id) => match entries.iter().position(|entry| &entry.event.id == id) {
            Some(index) => entries.into_iter().skip(index + 1).collect(),
            None => entries,
        },
    }
}

/// Removes applied prefixes from queues
pub struct Acknowledger {
    queue: Arc<dyn QueueStore>,
    config: AckConfig,
}

impl Acknowledger {
    pub fn new(queue: Arc<dyn QueueStore>) -> Self {
        Self::with_config(queue, AckConfig::default())
    }

    pub fn with_config(queue: Arc<dyn QueueStore>, config: AckConfig) -> Self {
        Self { queue, config }
    }

    /// Trim `principal`'s own queue through `marker`
    ///
    /// # Errors
    ///
    /// - [`BufferError::Auth`] for anonymous principals
    /// - [`BufferError::Contention`] only when `max_attempts` is configured and exhausted
    /// - [`BufferError::Storage`] for anything the store reports besides a conflict
    #[instrument(skip_all, fields(owner = %principal.owner, marker = %marker))]
    pub async fn acknowledge(
        &self,
        principal: &Principal,
        marker: &Marker,
    ) -> Result<TrimOutcome, BufferError> {
        let owner = &principal.owner;
        authorize_trim(principal, owner)?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;

            let snapshot = self.queue.snapshot(owner).await?;
            let before = snapshot.len();
            let remainder = trim_entries(snapshot.entries, marker);
            let remaining = remainder.len();
            let removed = before - remaining;

            if removed == 0 {
                debug!(attempts, remaining, "Nothing to trim");
                return Ok(TrimOutcome {
                    removed,
                    remaining,
                    attempts,
                    version: snapshot.version.0,
                });
            }

            match self
                .queue
                .compare_and_swap(owner, snapshot.version, remainder)
                .await
            {
                Ok(version) => {
                    info!(removed, remaining, attempts, "Trimmed queue");
                    return Ok(TrimOutcome {
                        removed,
                        remaining,
                        attempts,
                        version: version.0,
                    });
                }
                Err(StorageError::Conflict { expected, actual }) => {
                    if let Some(max) = self.config.max_attempts
                        && attempts >= max
                    {
                        warn!(attempts, "Giving up on trim after repeated conflicts");
                        return Err(BufferError::Contention { attempts });
                    }
                    let delay = self.config.backoff(attempts);
                    warn!(
                        attempts,
                        expected,
                        actual,
                        delay_ms = delay.as_millis() as u64,
                        "Queue changed during trim, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop every queued event of `principal`, applied or not
    pub async fn clear(&self, principal: &Principal) -> Result<TrimOutcome, BufferError> {
        self.acknowledge(principal, &Marker::ClearAll).await
    }
}

#[async_trait]
impl QueueTrimmer for Acknowledger {
    async fn trim(
        &self,
        principal: &Principal,
        marker: &Marker,
    ) -> Result<TrimOutcome, BufferError> {
        self.acknowledge(principal, marker).await
    }
}
