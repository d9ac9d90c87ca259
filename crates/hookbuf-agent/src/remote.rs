//! Queue access over a hookbuf server's HTTP API
//!
//! [`RemoteQueue`] lets a watcher run in a different process (or host) from
//! the server that owns the queue database. Reads go through `GET /queue`,
//! trims through `POST /wipe`, and change notifications are produced by a
//! background task that long-polls `GET /queue/changes`.
//!
//! A remote queue is bound to the owner of its bearer token; that owner is
//! learned when connecting.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use hookbuf_core::{AuthProvider, BufferError, Marker, OwnerId, Principal, QueueTrimmer, TrimOutcome};
use hookbuf_storage::{
    ChangeFeed, ChangeKind, QueueChange, QueueHead, QueueReader, QueueSnapshot, QueueVersion,
    QueueView, StorageError,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// Extra time a change poll may take beyond the wait it asked for
const REQUEST_MARGIN: Duration = Duration::from_secs(10);

/// A hookbuf server's queue, seen by one token's owner
pub struct RemoteQueue {
    client: reqwest::Client,
    base_url: String,
    token: String,
    owner: OwnerId,
    feed: Arc<ChangeFeed>,
    poll_wait: Duration,
    retry_delay: Duration,
    poller: OnceLock<JoinHandle<()>>,
}

impl RemoteQueue {
    /// Connect to the server and learn which owner the token belongs to
    ///
    /// # Errors
    ///
    /// Fails if the server is unreachable or refuses the token.
    #[instrument(skip_all, fields(server = %config.server_url))]
    pub async fn connect(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.poll_wait() + REQUEST_MARGIN)
            .build()?;
        let mut queue = Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            owner: OwnerId::new(""),
            feed: Arc::new(ChangeFeed::default()),
            poll_wait: config.poll_wait(),
            retry_delay: config.retry_delay(),
            poller: OnceLock::new(),
        };

        let view: QueueView = queue.fetch(queue.get("/queue")).await?;
        info!(owner = %view.owner, pending = view.snapshot.len(), "Connected to remote queue");
        queue.owner = view.owner;
        Ok(queue)
    }

    /// Owner of the token
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Principal to watch this queue with
    pub fn principal(&self) -> Principal {
        Principal::new(self.owner.clone(), AuthProvider::Token)
    }

    /// Current version and length of the queue
    pub async fn head(&self) -> Result<QueueHead, RemoteError> {
        self.fetch(self.get("/queue/changes")).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = request.send().await?;
        decode(response).await
    }

    fn check_owner(&self, owner: &OwnerId) -> Result<(), RemoteError> {
        if owner == &self.owner {
            Ok(())
        } else {
            Err(RemoteError::WrongOwner {
                owner: owner.clone(),
                token_owner: self.owner.clone(),
            })
        }
    }

    fn spawn_poller(&self) -> JoinHandle<()> {
        let poller = ChangePoller {
            client: self.client.clone(),
            url: self.url("/queue/changes"),
            token: self.token.clone(),
            owner: self.owner.clone(),
            feed: self.feed.clone(),
            wait: self.poll_wait,
            retry_delay: self.retry_delay,
        };
        tokio::spawn(poller.run())
    }
}

impl Drop for RemoteQueue {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

#[async_trait]
impl QueueReader for RemoteQueue {
    async fn snapshot(&self, owner: &OwnerId) -> Result<QueueSnapshot, StorageError> {
        self.check_owner(owner)?;
        let view: QueueView = self.fetch(self.get("/queue")).await?;
        self.check_owner(&view.owner)?;
        Ok(view.snapshot)
    }

    /// Notifications come from a long-poll task started on first use
    fn subscribe(&self, owner: &OwnerId) -> broadcast::Receiver<QueueChange> {
        let changes = self.feed.subscribe(owner);
        if owner == &self.owner {
            self.poller.get_or_init(|| self.spawn_poller());
        }
        changes
    }
}

#[async_trait]
impl QueueTrimmer for RemoteQueue {
    async fn trim(&self, principal: &Principal, marker: &Marker) -> Result<TrimOutcome, BufferError> {
        self.check_owner(&principal.owner)?;
        let request = self
            .client
            .post(self.url("/wipe"))
            .bearer_auth(&self.token)
            .json(marker);
        let outcome: TrimOutcome = self.fetch(request).await?;
        debug!(owner = %self.owner, marker = %marker, removed = outcome.removed, "Remote trim committed");
        Ok(outcome)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::FORBIDDEN => RemoteError::Forbidden(body),
        StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Rejected(body),
        _ => RemoteError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

/// Turns long-poll answers into change notifications
struct ChangePoller {
    client: reqwest::Client,
    url: String,
    token: String,
    owner: OwnerId,
    feed: Arc<ChangeFeed>,
    wait: Duration,
    retry_delay: Duration,
}

impl ChangePoller {
    async fn run(self) {
        let mut seen: Option<QueueVersion> = None;
        loop {
            match self.poll(seen).await {
                Ok(head) if seen != Some(head.version) => {
                    seen = Some(head.version);
                    self.feed.publish(QueueChange {
                        owner: self.owner.clone(),
                        version: head.version,
                        kind: ChangeKind::Polled {
                            remaining: head.remaining,
                        },
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(owner = %self.owner, error = %e, "Change poll failed");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn poll(&self, after: Option<QueueVersion>) -> Result<QueueHead, RemoteError> {
        let mut query = vec![("wait_ms", self.wait.as_millis().to_string())];
        if let Some(after) = after {
            query.push(("after", after.0.to_string()));
        }
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }
}
