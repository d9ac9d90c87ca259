//! # hookbuf-agent
//!
//! Consumer side of the webhook buffer. An agent owns a document store
//! (usually a vault directory of text files) and, for each watched owner,
//! replays the owner's queue into it and acknowledges what was applied.
//!
//! Delivery is at-least-once: if a batch fails halfway, the events applied
//! before the failure stay written and are written again on the retry.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hookbuf_agent::{Agent, AgentConfig, FsTargetStore};
//! use hookbuf_core::{AuthProvider, Principal};
//! use hookbuf_storage::{Acknowledger, InMemoryQueueStore};
//!
//! let queue = Arc::new(InMemoryQueueStore::new());
//! let config = AgentConfig::with_vault_dir("./vault");
//! let agent = Agent::new(
//!     queue.clone(),
//!     Arc::new(Acknowledger::new(queue)),
//!     Arc::new(FsTargetStore::new(&config.vault_dir)),
//!     &config,
//! );
//! agent.watch(Principal::new("alice", AuthProvider::Token))?;
//! ```
//!
//! To consume a queue held by a separate `hookbuf serve` process, use a
//! [`RemoteQueue`] as both the queue and the trimmer:
//!
//! ```ignore
//! let remote = Arc::new(RemoteQueue::connect(&RemoteConfig::new(url, token)).await?);
//! let agent = Agent::new(remote.clone(), remote.clone(), target, &config);
//! agent.watch(remote.principal())?;
//! ```

pub mod apply;
pub mod config;
pub mod error;
pub mod remote;
pub mod target;
pub mod watcher;

pub use apply::{ApplyCursor, ApplyEngine, container_dir};
pub use config::{AgentConfig, LineEnding, RemoteConfig};
pub use error::{AgentError, AgentResult, RemoteError};
pub use remote::RemoteQueue;
pub use target::{EntryKind, FsTargetStore, MemoryTargetStore, TargetStore};
pub use watcher::{BatchProcessor, BatchReport, Watcher, WatcherHandle, WatcherState, WatcherStatus};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hookbuf_core::{OwnerId, Principal, QueueTrimmer};
use hookbuf_storage::QueueReader;
use tokio::sync::watch;
use tracing::info;

/// Runs at most one watcher per owner against a shared document store
pub struct Agent {
    queue: Arc<dyn QueueReader>,
    trimmer: Arc<dyn QueueTrimmer>,
    engine: ApplyEngine,
    retry_delay: Duration,
    watchers: DashMap<OwnerId, WatcherHandle>,
}

impl Agent {
    pub fn new(
        queue: Arc<dyn QueueReader>,
        trimmer: Arc<dyn QueueTrimmer>,
        target: Arc<dyn TargetStore>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            queue,
            trimmer,
            engine: ApplyEngine::new(target, config.line_ending),
            retry_delay: config.retry_delay(),
            watchers: DashMap::new(),
        }
    }

    /// Batch processor for `principal`'s queue
    pub fn processor(&self, principal: Principal) -> BatchProcessor {
        BatchProcessor::new(
            principal,
            self.queue.clone(),
            self.engine.clone(),
            self.trimmer.clone(),
        )
    }

    /// Start watching `principal`'s queue
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::AlreadyWatching`] if a watcher for the same
    /// owner is still running.
    pub fn watch(&self, principal: Principal) -> AgentResult<watch::Receiver<WatcherStatus>> {
        let owner = principal.owner.clone();
        let handle = match self.watchers.entry(owner.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_finished() {
                    return Err(AgentError::AlreadyWatching(owner));
                }
                occupied.insert(Watcher::spawn(self.processor(principal), self.retry_delay));
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Watcher::spawn(self.processor(principal), self.retry_delay))
            }
        };
        info!(owner = %owner, "Watching queue");
        Ok(handle.subscribe_status())
    }

    /// Stop watching `owner`; false if it was not watched
    pub async fn unwatch(&self, owner: &OwnerId) -> bool {
        match self.watchers.remove(owner) {
            Some((_, handle)) => {
                handle.shutdown().await;
                info!(owner = %owner, "Stopped watching queue");
                true
            }
            None => false,
        }
    }

    /// Current status of `owner`'s watcher
    pub fn status(&self, owner: &OwnerId) -> Option<WatcherStatus> {
        self.watchers.get(owner).map(|handle| handle.status())
    }

    /// Owners with a watcher
    pub fn watching(&self) -> Vec<OwnerId> {
        self.watchers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop every watcher
    pub async fn shutdown(&self) {
        for owner in self.watching() {
            self.unwatch(&owner).await;
        }
    }
}
