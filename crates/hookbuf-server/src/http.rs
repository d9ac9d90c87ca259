//! HTTP surface
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /{key}?path=<target>` | enqueue the raw body for the key's owner |
//! | `POST /wipe` | acknowledge through a marker, or clear with `{"id": -1}`; returns the trim outcome |
//! | `GET /queue` | the caller's queue and its version |
//! | `GET /queue/changes?after=<version>&wait_ms=<ms>` | long-poll until the version moves past `after` |
//! | `GET /healthz` | liveness probe |
//!
//! Every route but ingestion and `/healthz` takes an `Authorization: Bearer`
//! token. Callers are authenticated before their body is read.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use hookbuf_core::{AccessKey, BufferError, Marker, Principal, TrimOutcome, ValidationError};
use hookbuf_storage::{Acknowledger, QueueHead, QueueReader, QueueVersion, QueueView};
use http_body_util::LengthLimitError;
use serde::Deserialize;
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{Authenticator, bearer_token};
use crate::error::ServerError;
use crate::ingest::Ingestion;

/// Highest `path[N]` index still read as an array position
const ARRAY_INDEX_LIMIT: usize = 20;

/// Long-poll wait when the caller does not ask for one
pub const DEFAULT_CHANGE_WAIT_MS: u64 = 25_000;

/// Longest long-poll wait a caller can ask for
pub const MAX_CHANGE_WAIT_MS: u64 = 60_000;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<Ingestion>,
    pub acknowledger: Arc<Acknowledger>,
    pub queue: Arc<dyn QueueReader>,
    pub auth: Arc<dyn Authenticator>,
    pub max_body_bytes: usize,
}

impl AppState {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, ServerError> {
        let token = bearer_token(headers).map_err(BufferError::from)?;
        let principal = self
            .auth
            .authenticate(token)
            .await
            .map_err(BufferError::from)?;
        Ok(principal)
    }

    /// Read a request body, refusing more than `max_body_bytes`
    async fn read_body(&self, body: Body) -> Result<Bytes, ServerError> {
        axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| {
                let e = e.into_inner();
                if e.is::<LengthLimitError>() {
                    ServerError::PayloadTooLarge {
                        limit: self.max_body_bytes,
                    }
                } else {
                    ServerError::Body(e.to_string())
                }
            })
    }
}

/// Build the service router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/wipe", post(wipe))
        .route("/queue", get(queue))
        .route("/queue/changes", get(changes))
        .route("/{key}", post(ingest))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ingest(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    body: Body,
) -> Result<&'static str, ServerError> {
    let owner = state
        .ingestion
        .resolve_owner(&AccessKey::new(key))
        .await?;
    let body = state.read_body(body).await?;
    let path = path_param(&params);
    state.ingestion.enqueue(&owner, path.as_ref(), &body).await?;
    Ok("ok")
}

async fn wipe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<TrimOutcome>, ServerError> {
    let principal = state.authenticate(&headers).await?;
    let body = state.read_body(body).await?;

    let marker: Marker = serde_json::from_slice(&body)
        .map_err(|e| BufferError::from(ValidationError::InvalidMarker(e.to_string())))?;

    let outcome = state.acknowledger.acknowledge(&principal, &marker).await?;
    info!(
        owner = %principal.owner,
        marker = %marker,
        removed = outcome.removed,
        "Wipe requested"
    );
    Ok(Json(outcome))
}

async fn queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QueueView>, ServerError> {
    let principal = state.authenticate(&headers).await?;
    let snapshot = state.queue.snapshot(&principal.owner).await?;
    Ok(Json(QueueView {
        owner: principal.owner,
        snapshot,
    }))
}

/// Query of `GET /queue/changes`
#[derive(Debug, Default, Deserialize)]
pub struct ChangesQuery {
    /// Version the caller last saw; absent returns the current head at once
    pub after: Option<u64>,
    pub wait_ms: Option<u64>,
}

async fn changes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<QueueHead>, ServerError> {
    let principal = state.authenticate(&headers).await?;
    let owner = &principal.owner;

    // Subscribe before reading so a write in between is not missed
    let mut changes = state.queue.subscribe(owner);
    let snapshot = state.queue.snapshot(owner).await?;
    let after = match query.after {
        Some(after) if snapshot.version == QueueVersion(after) => QueueVersion(after),
        _ => return Ok(Json(QueueHead::from(&snapshot))),
    };

    let wait_ms = query
        .wait_ms
        .unwrap_or(DEFAULT_CHANGE_WAIT_MS)
        .min(MAX_CHANGE_WAIT_MS);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
    loop {
        match tokio::time::timeout_at(deadline, changes.recv()).await {
            // Published before the snapshot was read
            Ok(Ok(change)) if change.version <= after => continue,
            _ => break,
        }
    }

    let snapshot = state.queue.snapshot(owner).await?;
    debug!(owner = %owner, after = %after, version = %snapshot.version, "Change poll answered");
    Ok(Json(QueueHead::from(&snapshot)))
}

/// Rebuild the `path` query parameter as a JSON value
///
/// `path=a` is a string. Repeated `path`, `path[]` and `path[N]` build an
/// array (indexed entries in index order, after unindexed ones). Any other
/// `path[name]` turns the whole parameter into an object. `None` when the
/// parameter is absent.
pub fn path_param(pairs: &[(String, String)]) -> Option<Value> {
    let mut listed = Vec::new();
    let mut indexed = BTreeMap::new();
    let mut named = Map::new();
    let mut bracketed = false;

    for (name, value) in pairs {
        let Some(suffix) = name.strip_prefix("path") else {
            continue;
        };
        if suffix.is_empty() {
            listed.push(value.clone());
            continue;
        }
        let Some(inner) = suffix.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
            continue;
        };
        bracketed = true;
        if inner.is_empty() {
            listed.push(value.clone());
            continue;
        }
        match inner.parse::<usize>() {
            Ok(index) if index <= ARRAY_INDEX_LIMIT => {
                indexed.insert(index, value.clone());
            }
            _ => {
                named.insert(inner.to_string(), Value::String(value.clone()));
            }
        }
    }

    listed.extend(indexed.into_values());
    if !named.is_empty() {
        for (position, value) in listed.into_iter().enumerate() {
            named
                .entry(position.to_string())
                .or_insert(Value::String(value));
        }
        return Some(Value::Object(named));
    }

    match listed.len() {
        0 => None,
        1 if !bracketed => listed.pop().map(Value::String),
        _ => Some(Value::Array(listed.into_iter().map(Value::String).collect())),
    }
}
