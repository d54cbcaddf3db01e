//! regionsync node
//!
//! Runs either the coordinator or a region:
//!
//!   regionsync-node --config coordinator.toml coordinator
//!   regionsync-node --config eu-west.toml region --coordinator http://coord:8080
//!
//! Ctrl-C stops background loops, drains in-flight HTTP requests and, on a
//! region, makes a last attempt to deliver queued changes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regionsync_node::api::{self, coordinator_router, region_router};
use regionsync_node::{HttpCoordinatorClient, NodeConfig, logging};
use regionsync_storage::{open_backend, open_metadata_store};
use regionsync_sync::{
    ConflictResolver, Coordinator, FileService, RegionInfo, SyncAgent, SyncError, SyncMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "regionsync-node")]
#[command(about = "regionsync coordinator and region node")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the coordinator
    Coordinator {
        /// Listen address, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a region node
    Region {
        /// Listen address, overrides server.bind
        #[arg(long)]
        bind: Option<String>,

        /// Coordinator base URL, overrides coordinator.url
        #[arg(long)]
        coordinator: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => NodeConfig::default(),
    };

    let is_coordinator = matches!(args.role, Role::Coordinator { .. });
    match args.role {
        Role::Coordinator { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
        }
        Role::Region { bind, coordinator } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(url) = coordinator {
                config.coordinator.url = url;
            }
        }
    }
    config.validate().context("invalid configuration")?;
    logging::init(&config.logger, args.verbose)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    if is_coordinator {
        run_coordinator(config, shutdown).await
    } else {
        run_region(config, shutdown).await
    }
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown requested");
            shutdown.cancel();
        }
        Err(e) => warn!("Cannot listen for Ctrl-C: {e}"),
    }
}

async fn bind(config: &NodeConfig) -> Result<TcpListener> {
    TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))
}

async fn run_coordinator(config: NodeConfig, shutdown: CancellationToken) -> Result<()> {
    info!(strategy = ?config.engine.strategy, conflicts = ?config.conflict.default_strategy, "Coordinator starting");
    let coordinator = Arc::new(Coordinator::new(
        config.engine.clone(),
        &config.conflict,
        config.registry.clone(),
    ));
    let tasks = coordinator.start(&shutdown);
    let listener = bind(&config).await?;

    println!("\n========================================");
    println!("  regionsync coordinator running");
    println!("========================================");
    println!("  Listen:   {}", config.server.bind);
    println!("  Strategy: {:?}", config.engine.strategy);
    println!("========================================\n");

    let served = api::serve(listener, coordinator_router(coordinator), shutdown.clone()).await;
    shutdown.cancel();
    tasks.stop().await;
    served.context("HTTP server failed")?;
    info!("Coordinator stopped");
    Ok(())
}

async fn run_region(config: NodeConfig, shutdown: CancellationToken) -> Result<()> {
    let agent_config = config.agent_config();
    let region_id = agent_config.region_id.clone();
    info!(region_id = %region_id, mode = ?agent_config.mode, "Region starting");

    let backend = open_backend(&config.storage)
        .await
        .context("failed to open content storage")?;
    let store = open_metadata_store(&config.metadata).context("failed to open metadata store")?;
    let client = Arc::new(HttpCoordinatorClient::new(
        config.coordinator.url.clone(),
        agent_config.request_timeout(),
    )?);
    if agent_config.mode != SyncMode::Pull {
        info!(region_id = %region_id, "Inbound changes are fetched on recovery only; use pull mode for continuous sync");
    }
    let agent = Arc::new(SyncAgent::new(
        agent_config,
        client.clone(),
        Arc::clone(&store),
        ConflictResolver::new(&config.conflict),
    ));
    let service = Arc::new(FileService::new(backend, store, Arc::clone(&agent)));

    let info = RegionInfo::new(
        region_id.clone(),
        config.region.name.clone(),
        config.region.endpoint.clone(),
    );
    match client.register_region(&info).await {
        Ok(_) => info!(region_id = %region_id, coordinator = client.base_url(), "Registered with coordinator"),
        Err(SyncError::AlreadyExists(_)) => info!(region_id = %region_id, "Already registered with coordinator"),
        Err(e) => warn!(region_id = %region_id, "Could not register with coordinator, starting offline: {e}"),
    }

    agent.requeue_pending()?;
    if let Err(e) = agent.recover().await {
        warn!(region_id = %region_id, "Startup recovery failed, changes stay queued: {e}");
    }
    let sync = agent.start(&shutdown);
    let heartbeat = agent.start_heartbeat(&shutdown);
    let listener = bind(&config).await?;

    println!("\n========================================");
    println!("  regionsync region running");
    println!("========================================");
    println!("  Region:      {region_id}");
    println!("  Listen:      {}", config.server.bind);
    println!("  Coordinator: {}", client.base_url());
    println!("========================================\n");

    let served = api::serve(listener, region_router(service), shutdown.clone()).await;
    shutdown.cancel();
    sync.stop().await;
    heartbeat.stop().await;

    let flushed = agent.flush_all().await;
    let stats = agent.stats();
    info!(region_id = %region_id, flushed, remaining = stats.queued, "Region stopped");
    served.context("HTTP server failed")?;
    Ok(())
}
