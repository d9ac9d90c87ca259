//! HTTP-level tests, driving the router in-process

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use hookbuf_agent::{ApplyEngine, BatchProcessor, LineEnding, MemoryTargetStore};
use hookbuf_core::{AccessKey, AuthProvider, OwnerId, Principal};
use hookbuf_server::{App, ServerConfig, Stores};
use hookbuf_core::TrimOutcome;
use hookbuf_storage::{AccessKeyStore, QueueHead, QueueReader, QueueStore, QueueView};
use tower::ServiceExt;

struct Harness {
    app: App,
    router: Router,
    key: AccessKey,
    owner: OwnerId,
}

impl Harness {
    async fn new() -> Self {
        let config = ServerConfig::default()
            .with_principal("alice-token", "alice")
            .with_principal("mallory-token", "mallory");
        let app = App::new(config, Stores::in_memory()).unwrap();
        let owner = OwnerId::new("alice");
        let key = app.stores().keys.issue(&owner).await.unwrap();
        let router = app.router();
        Self {
            app,
            router,
            key,
            owner,
        }
    }

    fn queue(&self) -> &Arc<dyn QueueStore> {
        &self.app.stores().queue
    }

    async fn post(&self, uri: &str, body: &str) -> (StatusCode, String) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn wipe(&self, token: Option<&str>, body: &str) -> (StatusCode, String) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/wipe")
            .header("content-type", "application/json");
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn queued(&self) -> usize {
        self.queue().snapshot(&self.owner).await.unwrap().len()
    }
}

#[tokio::test]
async fn test_ingest_then_apply() {
    let h = Harness::new().await;

    let (status, body) = h
        .post(&format!("/{}?path=notes/log.md", h.key), "hello")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let snapshot = h.queue().snapshot(&h.owner).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    let event = &snapshot.entries[0].event;
    assert_eq!(event.target_path(), Some("notes/log.md"));
    assert_eq!(event.data, "hello");

    let target = Arc::new(MemoryTargetStore::new());
    BatchProcessor::new(
        Principal::new("alice", AuthProvider::Token),
        h.app.stores().reader.clone(),
        ApplyEngine::new(target.clone(), LineEnding::None),
        h.app.acknowledger().clone(),
    )
    .process_once()
    .await
    .unwrap();

    assert_eq!(target.content("notes/log.md").await.as_deref(), Some("hello"));
    assert_eq!(h.queued().await, 0);
}

#[tokio::test]
async fn test_unknown_key_is_forbidden() {
    let h = Harness::new().await;

    for uri in ["/zzz?path=a.md", "/zzz?path%5Ba%5D=b", "/zzz"] {
        let (status, body) = h.post(uri, "payload").await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body, "invalid key");
    }
    assert_eq!(h.queued().await, 0);
}

#[tokio::test]
async fn test_rotated_key_is_forbidden() {
    let h = Harness::new().await;
    let old = h.key.clone();
    let new = h.app.stores().keys.issue(&h.owner).await.unwrap();

    let (status, _) = h.post(&format!("/{old}?path=a.md"), "x").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = h.post(&format!("/{new}?path=a.md"), "x").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_array_path_uses_first_element() {
    let h = Harness::new().await;

    let (status, _) = h
        .post(&format!("/{}?path=first.md&path=second.md", h.key), "x")
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h
        .post(&format!("/{}?path%5B1%5D=z.md&path%5B0%5D=y.md", h.key), "x")
        .await;
    assert_eq!(status, StatusCode::OK);

    let paths: Vec<_> = h
        .queue()
        .snapshot(&h.owner)
        .await
        .unwrap()
        .events()
        .map(|e| e.target_path().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["first.md", "y.md"]);
}

#[tokio::test]
async fn test_malformed_path_is_unprocessable() {
    let h = Harness::new().await;

    let (status, body) = h.post(&format!("/{}?path%5Ba%5D=b", h.key), "x").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        r#"path not a valid format. expected string received {"a":"b"}"#
    );

    let (status, body) = h.post(&format!("/{}", h.key), "x").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.ends_with("received undefined"));

    assert_eq!(h.queued().await, 0);
}

#[tokio::test]
async fn test_wipe_clears_queue() {
    let h = Harness::new().await;
    for path in ["a.md", "b.md", "c.md"] {
        h.post(&format!("/{}?path={path}", h.key), "x").await;
    }

    let (status, body) = h.wipe(Some("alice-token"), r#"{"id": -1}"#).await;

    assert_eq!(status, StatusCode::OK);
    let outcome: TrimOutcome = serde_json::from_str(&body).unwrap();
    assert_eq!((outcome.removed, outcome.remaining), (3, 0));
    assert_eq!(h.queued().await, 0);
}

#[tokio::test]
async fn test_wipe_through_marker() {
    let h = Harness::new().await;
    for path in ["a.md", "b.md", "c.md"] {
        h.post(&format!("/{}?path={path}", h.key), "x").await;
    }
    let snapshot = h.queue().snapshot(&h.owner).await.unwrap();
    let second = &snapshot.entries[1].event.id;

    let (status, _) = h
        .wipe(Some("alice-token"), &format!(r#"{{"id": "{second}"}}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    let remaining = h.queue().snapshot(&h.owner).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining.entries[0].event.target_path(), Some("c.md"));
}

#[tokio::test]
async fn test_wipe_requires_credentials() {
    let h = Harness::new().await;
    h.post(&format!("/{}?path=a.md", h.key), "x").await;

    let (status, _) = h.wipe(None, r#"{"id": -1}"#).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = h.wipe(Some("wrong"), r#"{"id": -1}"#).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Another owner's token only ever touches its own queue
    let (status, body) = h.wipe(Some("mallory-token"), r#"{"id": -1}"#).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: TrimOutcome = serde_json::from_str(&body).unwrap();
    assert_eq!(outcome.removed, 0);

    assert_eq!(h.queued().await, 1);
}

#[tokio::test]
async fn test_anonymous_principal_cannot_wipe() {
    let config = ServerConfig::from_toml(
        r#"
        [[principals]]
        token = "guest"
        owner = "alice"
        provider = "anonymous"
        "#,
    )
    .unwrap();
    let app = App::new(config, Stores::in_memory()).unwrap();
    let owner = OwnerId::new("alice");
    let key = app.stores().keys.issue(&owner).await.unwrap();
    let router = app.router();

    let ingest = Request::builder()
        .method("POST")
        .uri(format!("/{key}?path=a.md"))
        .body(Body::from("x"))
        .unwrap();
    assert_eq!(router.clone().oneshot(ingest).await.unwrap().status(), StatusCode::OK);

    let wipe = Request::builder()
        .method("POST")
        .uri("/wipe")
        .header("authorization", "Bearer guest")
        .body(Body::from(r#"{"id": -1}"#))
        .unwrap();
    assert_eq!(router.oneshot(wipe).await.unwrap().status(), StatusCode::FORBIDDEN);

    assert_eq!(app.stores().queue.snapshot(&owner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_wipe_rejects_unknown_numeric_marker() {
    let h = Harness::new().await;
    h.post(&format!("/{}?path=a.md", h.key), "x").await;

    let (status, body) = h.wipe(Some("alice-token"), r#"{"id": 7}"#).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.starts_with("invalid marker"));
    assert_eq!(h.queued().await, 1);
}

#[tokio::test]
async fn test_healthz() {
    let h = Harness::new().await;
    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(request).await, (StatusCode::OK, "ok".to_string()));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let config = ServerConfig {
        max_body_bytes: 8,
        ..ServerConfig::default()
    };
    let app = App::new(config, Stores::in_memory()).unwrap();
    let owner = OwnerId::new("alice");
    let key = app.stores().keys.issue(&owner).await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/{key}?path=a.md"))
        .body(Body::from("0123456789abcdef"))
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.stores().queue.snapshot(&owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_body_with_unknown_key_is_forbidden() {
    let config = ServerConfig {
        max_body_bytes: 8,
        ..ServerConfig::default()
    }
    .with_principal("alice-token", "alice");
    let app = App::new(config, Stores::in_memory()).unwrap();
    let router = app.router();
    let oversized = "0123456789abcdef";

    let ingest = Request::builder()
        .method("POST")
        .uri("/zzz?path=a.md")
        .body(Body::from(oversized))
        .unwrap();
    let response = router.clone().oneshot(ingest).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let wipe = Request::builder()
        .method("POST")
        .uri("/wipe")
        .header("authorization", "Bearer wrong")
        .body(Body::from(oversized))
        .unwrap();
    assert_eq!(router.clone().oneshot(wipe).await.unwrap().status(), StatusCode::FORBIDDEN);

    let wipe = Request::builder()
        .method("POST")
        .uri("/wipe")
        .header("authorization", "Bearer alice-token")
        .body(Body::from(oversized))
        .unwrap();
    assert_eq!(
        router.oneshot(wipe).await.unwrap().status(),
        StatusCode::PAYLOAD_TOO_LARGE
    );
}

#[tokio::test]
async fn test_queue_lists_callers_entries_in_order() {
    let h = Harness::new().await;
    for path in ["a.md", "b.md"] {
        h.post(&format!("/{}?path={path}", h.key), "x").await;
    }

    let (status, body) = h.get("/queue", Some("alice-token")).await;
    assert_eq!(status, StatusCode::OK);
    let view: QueueView = serde_json::from_str(&body).unwrap();
    assert_eq!(view.owner, h.owner);
    assert_eq!(view.snapshot.version.0, 2);
    let paths: Vec<_> = view.snapshot.events().filter_map(|e| e.target_path()).collect();
    assert_eq!(paths, vec!["a.md", "b.md"]);

    let (status, body) = h.get("/queue", Some("mallory-token")).await;
    assert_eq!(status, StatusCode::OK);
    let view: QueueView = serde_json::from_str(&body).unwrap();
    assert!(view.snapshot.is_empty());

    let (status, _) = h.get("/queue", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = h.get("/queue/changes", Some("wrong")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_changes_returns_at_once_when_behind() {
    let h = Harness::new().await;
    h.post(&format!("/{}?path=a.md", h.key), "x").await;

    let (status, body) = h.get("/queue/changes?after=0", Some("alice-token")).await;
    assert_eq!(status, StatusCode::OK);
    let head: QueueHead = serde_json::from_str(&body).unwrap();
    assert_eq!((head.version.0, head.remaining), (1, 1));
}

#[tokio::test]
async fn test_changes_times_out_without_writes() {
    let h = Harness::new().await;

    let (status, body) = h
        .get("/queue/changes?after=0&wait_ms=50", Some("alice-token"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let head: QueueHead = serde_json::from_str(&body).unwrap();
    assert_eq!((head.version.0, head.remaining), (0, 0));
}

#[tokio::test]
async fn test_changes_wakes_on_append() {
    let h = Arc::new(Harness::new().await);

    let poll = {
        let h = h.clone();
        tokio::spawn(async move {
            h.get("/queue/changes?after=0&wait_ms=5000", Some("alice-token"))
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    h.post(&format!("/{}?path=a.md", h.key), "x").await;

    let (status, body) = tokio::time::timeout(std::time::Duration::from_secs(2), poll)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    let head: QueueHead = serde_json::from_str(&body).unwrap();
    assert_eq!(head.version.0, 1);
}
