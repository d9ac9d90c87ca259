//! Service assembly: stores, handlers and embedded watchers

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use hookbuf_agent::{Agent, FsTargetStore};
use hookbuf_core::{AuthProvider, Principal};
use hookbuf_storage::{
    AccessKeyStore, AckConfig, Acknowledger, InMemoryKeyStore, InMemoryQueueStore, QueueReader,
    QueueStore, RedbStore, RedbStoreConfig,
};
use tracing::info;

use crate::auth::{Authenticator, StaticAuthenticator};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::{AppState, build_router};
use crate::ingest::Ingestion;

/// Queue and key stores shared by every component
///
/// `reader` is the same queue as `queue`, seen through its read side.
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub reader: Arc<dyn QueueReader>,
    pub keys: Arc<dyn AccessKeyStore>,
}

impl Stores {
    /// Volatile stores; everything is lost on exit
    pub fn in_memory() -> Self {
        let queue = Arc::new(InMemoryQueueStore::new());
        Self {
            queue: queue.clone(),
            reader: queue,
            keys: Arc::new(InMemoryKeyStore::new()),
        }
    }

    /// Stores described by `config`
    pub fn open(config: &ServerConfig) -> Result<Self, ServerError> {
        match config.db_path() {
            Some(db_path) => {
                if let Some(parent) = db_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = Arc::new(RedbStore::open(RedbStoreConfig::with_path(db_path))?);
                Ok(Self {
                    queue: store.clone(),
                    reader: store.clone(),
                    keys: store,
                })
            }
            None => Ok(Self::in_memory()),
        }
    }
}

/// A configured hookbuf service
pub struct App {
    config: ServerConfig,
    stores: Stores,
    acknowledger: Arc<Acknowledger>,
    auth: Arc<dyn Authenticator>,
    agent: Option<Agent>,
}

impl App {
    pub fn new(config: ServerConfig, stores: Stores) -> Result<Self, ServerError> {
        let acknowledger = Arc::new(Acknowledger::with_config(
            stores.queue.clone(),
            AckConfig::from(&config.ack),
        ));
        let auth = Arc::new(StaticAuthenticator::from_entries(&config.principals));

        let agent = match &config.agent {
            Some(embedded) => {
                std::fs::create_dir_all(&embedded.agent.vault_dir)?;
                Some(Agent::new(
                    stores.reader.clone(),
                    acknowledger.clone(),
                    Arc::new(FsTargetStore::new(&embedded.agent.vault_dir)),
                    &embedded.agent,
                ))
            }
            None => None,
        };

        Ok(Self {
            config,
            stores,
            acknowledger,
            auth,
            agent,
        })
    }

    /// Replace the authenticator built from the configured principals
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn acknowledger(&self) -> &Arc<Acknowledger> {
        &self.acknowledger
    }

    pub fn agent(&self) -> Option<&Agent> {
        self.agent.as_ref()
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            ingestion: Arc::new(Ingestion::new(
                self.stores.keys.clone(),
                self.stores.queue.clone(),
            )),
            acknowledger: self.acknowledger.clone(),
            queue: self.stores.reader.clone(),
            auth: self.auth.clone(),
            max_body_bytes: self.config.max_body_bytes,
        };
        build_router(state)
    }

    /// Start a watcher for every configured owner
    pub fn start_watchers(&self) -> Result<(), ServerError> {
        let (Some(agent), Some(embedded)) = (&self.agent, &self.config.agent) else {
            return Ok(());
        };
        for owner in &embedded.owners {
            agent.watch(Principal::new(owner.clone(), AuthProvider::Token))?;
        }
        Ok(())
    }

    /// Serve HTTP until `shutdown` resolves, then stop the watchers
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        self.start_watchers()?;

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "hookbuf listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(agent) = &self.agent {
            agent.shutdown().await;
        }
        info!("hookbuf stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookbuf_agent::AgentConfig;
    use hookbuf_core::OwnerId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persistent_stores_share_one_database() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::default().with_data_dir(dir.path().join("data"));

        let stores = Stores::open(&config).unwrap();
        let key = stores.keys.issue(&OwnerId::new("alice")).await.unwrap();
        drop(stores);

        let reopened = Stores::open(&config).unwrap();
        assert_eq!(
            reopened.keys.resolve(&key).await.unwrap(),
            Some(OwnerId::new("alice"))
        );
        assert!(dir.path().join("data/hookbuf.redb").is_file());
    }

    #[tokio::test]
    async fn test_embedded_agent_watches_configured_owners() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::default().with_agent(
            AgentConfig::with_vault_dir(dir.path().join("vault")),
            vec![OwnerId::new("alice"), OwnerId::new("bob")],
        );

        let app = App::new(config, Stores::in_memory()).unwrap();
        app.start_watchers().unwrap();

        let agent = app.agent().unwrap();
        assert_eq!(agent.watching().len(), 2);
        assert!(dir.path().join("vault").is_dir());
        assert!(app.start_watchers().is_err());

        agent.shutdown().await;
    }
}
