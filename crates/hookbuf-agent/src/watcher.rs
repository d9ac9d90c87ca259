//! Background watcher that keeps one owner's document store in sync
//!
//! A watcher alternates between two states:
//!
//! - **Idle**: waiting for a change notification on the owner's queue
//! - **Processing**: snapshot, apply, acknowledge
//!
//! Notifications that arrive while processing are folded into a single
//! re-check of the queue once the batch completes. A failed batch is not
//! acknowledged; the watcher drops its subscription, waits the retry delay,
//! resubscribes and processes the whole queue again.

use std::sync::Arc;
use std::time::Duration;

use hookbuf_core::{OwnerId, Principal, QueueTrimmer};
use hookbuf_storage::{QueueChange, QueueReader};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::apply::ApplyEngine;
use crate::error::AgentResult;

/// Result of one snapshot-apply-acknowledge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Events written to the document store
    pub applied: usize,
    /// Events removed from the queue by the acknowledgment
    pub trimmed: usize,
    /// Events still queued after the acknowledgment
    pub remaining: usize,
}

/// Runs single batches for one owner
#[derive(Clone)]
pub struct BatchProcessor {
    principal: Principal,
    queue: Arc<dyn QueueReader>,
    engine: ApplyEngine,
    trimmer: Arc<dyn QueueTrimmer>,
}

impl BatchProcessor {
    pub fn new(
        principal: Principal,
        queue: Arc<dyn QueueReader>,
        engine: ApplyEngine,
        trimmer: Arc<dyn QueueTrimmer>,
    ) -> Self {
        Self {
            principal,
            queue,
            engine,
            trimmer,
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.principal.owner
    }

    /// Apply the current queue and acknowledge it
    ///
    /// An empty queue is a no-op and sends no acknowledgment.
    #[instrument(skip_all, fields(owner = %self.principal.owner))]
    pub async fn process_once(&self) -> AgentResult<BatchReport> {
        let snapshot = self.queue.snapshot(self.owner()).await?;
        let Some(cursor) = self.engine.apply_batch(&snapshot).await? else {
            debug!("Queue empty");
            return Ok(BatchReport::default());
        };

        let outcome = self.trimmer.trim(&self.principal, &cursor.marker()).await?;
        info!(
            applied = cursor.applied,
            trimmed = outcome.removed,
            remaining = outcome.remaining,
            "Batch applied"
        );
        Ok(BatchReport {
            applied: cursor.applied,
            trimmed: outcome.removed,
            remaining: outcome.remaining,
        })
    }

    /// Process batches until the queue is empty
    pub async fn drain(&self) -> AgentResult<BatchReport> {
        let mut total = BatchReport::default();
        loop {
            let report = self.process_once().await?;
            total.applied += report.applied;
            total.trimmed += report.trimmed;
            total.remaining = report.remaining;
            if report.applied == 0 || report.remaining == 0 {
                return Ok(total);
            }
        }
    }

    async fn has_pending(&self) -> AgentResult<bool> {
        Ok(!self.queue.snapshot(self.owner()).await?.is_empty())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueChange> {
        self.queue.subscribe(self.owner())
    }
}

/// Watcher state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherState {
    #[default]
    Idle,
    Processing,
    Stopped,
}

/// Observable progress of a watcher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStatus {
    pub state: WatcherState,
    /// Batches that applied at least one event
    pub batches: u64,
    pub events_applied: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Handle to a running watcher
pub struct WatcherHandle {
    owner: OwnerId,
    shutdown_tx: broadcast::Sender<()>,
    status: watch::Receiver<WatcherStatus>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Latest status
    pub fn status(&self) -> WatcherStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn subscribe_status(&self) -> watch::Receiver<WatcherStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the watcher and wait for it to exit
    ///
    /// A batch in flight is completed first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(owner = %self.owner, error = %e, "Watcher task failed");
        }
    }
}

/// Watch loop for one owner
pub struct Watcher {
    processor: BatchProcessor,
    retry_delay: Duration,
    status: watch::Sender<WatcherStatus>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Watcher {
    /// Spawn a watcher as a background task
    pub fn spawn(processor: BatchProcessor, retry_delay: Duration) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (status_tx, status_rx) = watch::channel(WatcherStatus::default());
        let owner = processor.owner().clone();

        let watcher = Self {
            processor,
            retry_delay,
            status: status_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(async move {
            watcher.run().await;
        });

        WatcherHandle {
            owner,
            shutdown_tx,
            status: status_rx,
            task,
        }
    }

    #[instrument(skip_all, fields(owner = %self.processor.owner()))]
    async fn run(mut self) {
        info!(retry_delay_ms = self.retry_delay.as_millis() as u64, "Watcher started");

        let mut changes = self.processor.subscribe();
        // Whatever is queued at startup counts as the first notification
        let mut pending = true;

        loop {
            if !pending {
                let feed_closed = tokio::select! {
                    _ = self.shutdown_rx.recv() => break,
                    received = changes.recv() => match received {
                        Ok(change) => {
                            debug!(version = %change.version, "Queue changed");
                            false
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Change feed lagged, re-reading queue");
                            false
                        }
                        Err(RecvError::Closed) => true,
                    },
                };

                if feed_closed {
                    warn!("Change feed closed, resubscribing");
                    if self.sleep_or_shutdown().await {
                        break;
                    }
                    changes = self.processor.subscribe();
                }
            }

            self.set_state(WatcherState::Processing);
            match self.processor.process_once().await {
                Ok(report) => {
                    self.status.send_modify(|status| {
                        if report.applied > 0 {
                            status.batches += 1;
                            status.events_applied += report.applied as u64;
                        }
                        status.last_error = None;
                    });

                    // Our own trim shows up here too; one re-check covers everything
                    pending = drain_notifications(&mut changes) > 0
                        && self.processor.has_pending().await.unwrap_or(true);
                    self.set_state(WatcherState::Idle);
                }
                Err(e) => {
                    error!(error = %e, "Batch failed, queue left untouched");
                    self.status.send_modify(|status| {
                        status.failures += 1;
                        status.last_error = Some(e.to_string());
                    });

                    drop(changes);
                    if self.sleep_or_shutdown().await {
                        break;
                    }
                    changes = self.processor.subscribe();
                    pending = true;
                    self.set_state(WatcherState::Idle);
                }
            }
        }

        self.set_state(WatcherState::Stopped);
        info!("Watcher stopped");
    }

    /// Sleep for the retry delay; true if shutdown was requested meanwhile
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.recv() => true,
            _ = tokio::time::sleep(self.retry_delay) => false,
        }
    }

    fn set_state(&self, state: WatcherState) {
        self.status.send_modify(|status| status.state = state);
    }
}

/// Discard buffered notifications, returning how many there were
fn drain_notifications(changes: &mut broadcast::Receiver<QueueChange>) -> usize {
    let mut drained = 0;
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => drained += 1,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return drained,
        }
    }
}
