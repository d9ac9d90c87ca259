//! hookbuf command-line entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use hookbuf_agent::{Agent, AgentConfig, FsTargetStore, RemoteConfig, RemoteQueue};
use hookbuf_core::{AuthProvider, OwnerId, Principal};
use hookbuf_logging::HookbufSubscriberBuilder;
use hookbuf_server::{App, ServerConfig, Stores};
use hookbuf_storage::{AccessKeyStore, AckConfig, Acknowledger};
use tracing::info;

#[derive(Parser)]
#[command(name = "hookbuf", version, about = "Buffer webhook payloads and replay them into a vault")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the queue database directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP ingestion service
    Serve {
        /// Listen address
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Issue a new webhook key for an owner, revoking the previous one
    IssueKey {
        #[arg(long)]
        owner: String,
    },
    /// Apply an owner's queued events to a vault and acknowledge them
    ///
    /// Reads the local database, or a running server with `--server`.
    Drain {
        /// Owner to drain; required without `--server`
        #[arg(long, required_unless_present = "server")]
        owner: Option<String>,
        /// Vault directory; defaults to the configured agent vault
        #[arg(long)]
        vault: Option<PathBuf>,
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Keep a vault in sync with a running server until interrupted
    Watch {
        /// Vault directory; defaults to the configured agent vault
        #[arg(long)]
        vault: Option<PathBuf>,
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Drop every queued event of an owner without applying it
    Clear {
        #[arg(long)]
        owner: String,
    },
}

/// Where a remote hookbuf server is and whose queue to read
#[derive(Args)]
struct RemoteArgs {
    /// Base URL of a running server, e.g. http://127.0.0.1:8787
    #[arg(long)]
    server: Option<String>,
    /// Bearer token of the queue's owner
    #[arg(long, requires = "server")]
    token: Option<String>,
}

impl RemoteArgs {
    fn config(&self) -> Option<RemoteConfig> {
        let server = self.server.as_ref()?;
        Some(RemoteConfig::new(
            server.clone(),
            self.token.clone().unwrap_or_default(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    let _guard = HookbufSubscriberBuilder::new()
        .with_config(config.logging.clone())
        .try_init()?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config = config.with_bind_addr(bind);
            }
            let stores = Stores::open(&config)?;
            App::new(config, stores)?
                .serve(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown requested");
                })
                .await?;
        }
        Command::IssueKey { owner } => {
            let stores = persistent_stores(&config)?;
            let key = stores.keys.issue(&OwnerId::new(owner)).await?;
            println!("{key}");
        }
        Command::Drain {
            owner,
            vault,
            remote,
        } => {
            let agent_config = agent_config(&config, vault)?;
            let target = Arc::new(FsTargetStore::new(&agent_config.vault_dir));
            let report = match (remote.config(), owner) {
                (Some(remote), _) => {
                    let queue = Arc::new(RemoteQueue::connect(&remote).await?);
                    let agent = Agent::new(queue.clone(), queue.clone(), target, &agent_config);
                    agent.processor(queue.principal()).drain().await?
                }
                (None, Some(owner)) => {
                    let stores = persistent_stores(&config)?;
                    let acknowledger = acknowledger(&config, &stores);
                    let agent = Agent::new(stores.reader, acknowledger, target, &agent_config);
                    agent.processor(principal(owner)).drain().await?
                }
                (None, None) => bail!("--owner is required without --server"),
            };
            println!(
                "applied {} event(s), {} still queued",
                report.applied, report.remaining
            );
        }
        Command::Watch { vault, remote } => {
            let Some(remote) = remote.config() else {
                bail!("--server is required");
            };
            let agent_config = agent_config(&config, vault)?;
            let queue = Arc::new(RemoteQueue::connect(&remote).await?);
            let agent = Agent::new(
                queue.clone(),
                queue.clone(),
                Arc::new(FsTargetStore::new(&agent_config.vault_dir)),
                &agent_config,
            );
            agent.watch(queue.principal())?;
            info!(owner = %queue.owner(), vault = %agent_config.vault_dir.display(), "Watching remote queue");

            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            agent.shutdown().await;
        }
        Command::Clear { owner } => {
            let stores = persistent_stores(&config)?;
            let outcome = acknowledger(&config, &stores)
                .clear(&principal(owner))
                .await?;
            println!("removed {} event(s)", outcome.removed);
        }
    }

    Ok(())
}

/// Configured agent settings with an optional vault override; creates the vault
fn agent_config(config: &ServerConfig, vault: Option<PathBuf>) -> Result<AgentConfig> {
    let mut agent_config = config
        .agent
        .as_ref()
        .map(|embedded| embedded.agent.clone())
        .unwrap_or_default();
    if let Some(vault) = vault {
        agent_config.vault_dir = vault;
    }
    std::fs::create_dir_all(&agent_config.vault_dir)
        .with_context(|| format!("creating vault {}", agent_config.vault_dir.display()))?;
    Ok(agent_config)
}

/// Offline commands are pointless against throwaway in-memory stores
fn persistent_stores(config: &ServerConfig) -> Result<Stores> {
    if config.data_dir.is_none() {
        bail!("data_dir must be set (in the config file or with --data-dir)");
    }
    Ok(Stores::open(config)?)
}

fn acknowledger(config: &ServerConfig, stores: &Stores) -> Arc<Acknowledger> {
    Arc::new(Acknowledger::with_config(
        stores.queue.clone(),
        AckConfig::from(&config.ack),
    ))
}

fn principal(owner: String) -> Principal {
    Principal::new(owner, AuthProvider::Token)
}
