//! Replays queued events against a document store
//!
//! Every event appends its payload to the file named by its path. Events
//! are applied strictly in queue order and the first failure stops the
//! batch, so the applied events always form a prefix of the snapshot.

use std::sync::Arc;

use hookbuf_core::{BufferedEvent, EventId, Marker, PathConflictError};
use hookbuf_storage::QueueSnapshot;
use tracing::{debug, instrument, warn};

use crate::config::LineEnding;
use crate::error::{AgentError, AgentResult};
use crate::target::{EntryKind, TargetStore};

/// Last event of a fully applied batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCursor {
    pub last: EventId,
    pub applied: usize,
}

impl ApplyCursor {
    /// Marker acknowledging everything up to and including the cursor
    pub fn marker(&self) -> Marker {
        Marker::Through(self.last.clone())
    }
}

/// Directory that must exist before `path` can be written
///
/// Trailing slashes are ignored and the directory is everything before
/// the last `/`, provided that is non-empty. Returns `None` when the
/// result would be `path` itself.
pub fn container_dir(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let dir = match trimmed.rfind('/') {
        Some(i) if i > 0 => &trimmed[..i],
        _ => trimmed,
    };
    (dir != path).then(|| dir.to_string())
}

/// Applies snapshots to a [`TargetStore`]
#[derive(Clone)]
pub struct ApplyEngine {
    target: Arc<dyn TargetStore>,
    line_ending: LineEnding,
}

impl ApplyEngine {
    pub fn new(target: Arc<dyn TargetStore>, line_ending: LineEnding) -> Self {
        Self {
            target,
            line_ending,
        }
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Apply a single event
    ///
    /// # Errors
    ///
    /// - [`AgentError::PathConflict`] if the target path is a directory
    /// - [`AgentError::InvalidPath`] if the event has no usable path
    /// - [`AgentError::Target`] for store I/O failures
    pub async fn apply_event(&self, event: &BufferedEvent) -> AgentResult<()> {
        let path = event
            .target_path()
            .ok_or_else(|| AgentError::invalid_path("", format!("event {} has no path", event.id)))?;

        if let Some(dir) = container_dir(path)
            && self.target.stat(&dir).await?.is_none()
        {
            self.target.create_dir_all(&dir).await?;
        }

        let payload = format!("{}{}", event.data, self.line_ending.as_str());
        let content = match self.target.stat(path).await? {
            Some(EntryKind::Directory) => return Err(PathConflictError::new(path).into()),
            Some(EntryKind::File) => self.target.read(path).await? + &payload,
            None => payload,
        };

        self.target.write(path, &content).await?;
        debug!(event_id = %event.id, path, "Applied event");
        Ok(())
    }

    /// Apply every event of `snapshot` in order
    ///
    /// Returns the cursor of the last event, or `None` for an empty
    /// snapshot. On error nothing is returned to acknowledge; events
    /// applied before the failure stay applied.
    #[instrument(skip_all, fields(events = snapshot.len(), version = %snapshot.version))]
    pub async fn apply_batch(&self, snapshot: &QueueSnapshot) -> AgentResult<Option<ApplyCursor>> {
        let mut cursor = None;
        for (applied, event) in snapshot.events().enumerate() {
            if let Err(e) = self.apply_event(event).await {
                warn!(event_id = %event.id, applied, error = %e, "Batch stopped");
                return Err(e);
            }
            cursor = Some(ApplyCursor {
                last: event.id.clone(),
                applied: applied + 1,
            });
        }
        Ok(cursor)
    }
}
