//! A watcher in its own "process": it only talks to the server over HTTP
//!
//! The server owns the redb file; the agent side holds nothing but a
//! server URL and a bearer token.

use std::sync::Arc;
use std::time::Duration;

use hookbuf_agent::{Agent, AgentConfig, MemoryTargetStore, RemoteConfig, RemoteQueue, WatcherState};
use hookbuf_core::OwnerId;
use hookbuf_server::{App, ServerConfig, Stores};
use hookbuf_storage::QueueReader;
use tempfile::TempDir;

struct Running {
    app: Arc<App>,
    url: String,
    key: String,
    _dir: TempDir,
}

async fn start() -> Running {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig::default()
        .with_data_dir(dir.path().join("data"))
        .with_principal("alice-token", "alice");
    let app = Arc::new(App::new(config.clone(), Stores::open(&config).unwrap()).unwrap());
    let key = app
        .stores()
        .keys
        .issue(&OwnerId::new("alice"))
        .await
        .unwrap()
        .to_string();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Running {
        app,
        url,
        key,
        _dir: dir,
    }
}

fn remote_config(url: &str) -> RemoteConfig {
    RemoteConfig::new(url, "alice-token")
        .with_poll_wait(Duration::from_millis(500))
        .with_retry_delay(Duration::from_millis(50))
}

/// Ingestion keeps running while a remote watcher drains the same queue
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_watcher_runs_alongside_ingestion() {
    const EVENTS: usize = 40;
    let server = start().await;

    let queue = Arc::new(RemoteQueue::connect(&remote_config(&server.url)).await.unwrap());
    assert_eq!(queue.owner(), &OwnerId::new("alice"));
    let target = Arc::new(MemoryTargetStore::new());
    let agent = Agent::new(
        queue.clone(),
        queue.clone(),
        target.clone(),
        &AgentConfig::default().with_retry_delay(Duration::from_millis(50)),
    );
    let mut status = agent.watch(queue.principal()).unwrap();

    let client = reqwest::Client::new();
    let producer = {
        let client = client.clone();
        let url = format!("{}/{}", server.url, server.key);
        tokio::spawn(async move {
            for i in 0..EVENTS {
                let response = client
                    .post(&url)
                    .query(&[("path", "log.md")])
                    .body(format!("{i},"))
                    .send()
                    .await
                    .unwrap();
                assert!(response.status().is_success());
                if i % 8 == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        })
    };
    producer.await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.events_applied == EVENTS as u64 && s.state == WatcherState::Idle),
    )
    .await
    .expect("remote watcher did not catch up")
    .unwrap();

    let expected: String = (0..EVENTS).map(|i| format!("{i},")).collect();
    assert_eq!(target.content("log.md").await.as_deref(), Some(expected.as_str()));

    let owner = OwnerId::new("alice");
    assert!(server.app.stores().reader.snapshot(&owner).await.unwrap().is_empty());
    assert!(queue.snapshot(&owner).await.unwrap().is_empty());

    agent.shutdown().await;
}

/// A drain over HTTP leaves the server's queue empty
#[tokio::test]
async fn test_remote_drain() {
    let server = start().await;
    let client = reqwest::Client::new();
    for path in ["a.md", "b.md", "a.md"] {
        client
            .post(format!("{}/{}", server.url, server.key))
            .query(&[("path", path)])
            .body("x")
            .send()
            .await
            .unwrap();
    }

    let queue = Arc::new(RemoteQueue::connect(&remote_config(&server.url)).await.unwrap());
    let target = Arc::new(MemoryTargetStore::new());
    let agent = Agent::new(queue.clone(), queue.clone(), target.clone(), &AgentConfig::default());
    let report = agent.processor(queue.principal()).drain().await.unwrap();

    assert_eq!((report.applied, report.remaining), (3, 0));
    assert_eq!(target.content("a.md").await.as_deref(), Some("xx"));
    assert_eq!(target.content("b.md").await.as_deref(), Some("x"));
}

/// The consumer never opens the database the server holds
#[tokio::test]
async fn test_server_keeps_database_lock() {
    let server = start().await;
    let config = server.app.config().clone();
    assert!(Stores::open(&config).is_err());
    assert!(RemoteQueue::connect(&remote_config(&server.url)).await.is_ok());
}
