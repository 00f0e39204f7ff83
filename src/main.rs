//! aether-node daemon
//!
//! Wires the store, identity, sync engine, dispatcher and event horizon
//! together and runs until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use aether_node::config::Config;
use aether_node::dispatch::{Dispatcher, ScheduledTask};
use aether_node::eventhorizon::EventHorizon;
use aether_node::identity::Identity;
use aether_node::inbound::{self, InboundState};
use aether_node::store::{SqliteStore, Store};
use aether_node::sync::Syncer;
use aether_node::transport::Transport;

#[derive(Parser)]
#[command(name = "aether-node")]
#[command(about = "Peer synchronization engine for the Aether content network")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "aether-node.toml")]
    config: String,

    /// Data directory
    #[arg(short, long, env = "AETHER_DATA_DIR")]
    data_dir: Option<String>,

    /// Port this node listens on
    #[arg(short, long, env = "AETHER_PORT")]
    port: Option<u16>,

    /// Bootstrapper to ask for peers on cold start, as host:port
    #[arg(long, env = "AETHER_BOOTSTRAPPER")]
    bootstrapper: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aether_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting aether-node");
    info!("Config file: {}", cli.config);

    let mut config = if std::path::Path::new(&cli.config).exists() {
        let content = std::fs::read_to_string(&cli.config)?;
        Config::from_toml(&content).with_context(|| format!("parsing {}", cli.config))?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = PathBuf::from(data_dir);
    }
    if let Some(port) = cli.port {
        config.node.port = port;
    }
    if let Some(bootstrapper) = cli.bootstrapper {
        config.node.bootstrapper = Some(bootstrapper);
    }
    std::fs::create_dir_all(&config.node.data_dir)
        .with_context(|| format!("creating {}", config.node.data_dir.display()))?;
    info!("Data dir: {}", config.node.data_dir.display());

    let config = Arc::new(config);
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(
        &config.node.data_dir,
        config.retention.max_address_table_size,
    )?);
    let identity = Arc::new(Identity::load_or_generate(&config)?);
    info!(node_id = %identity.node_id(), port = config.node.port, "Node identity ready");

    let horizon = EventHorizon::new(store.clone(), config.retention.clone());
    let transport = Transport::new(&config.network, config.dispatch.address_limit)?;
    let syncer = Syncer::new(
        config.clone(),
        store.clone(),
        identity.clone(),
        transport,
        horizon.handle(),
    );
    let dispatcher = Arc::new(Dispatcher::new(syncer, config.clone()));

    let mut tasks = dispatcher.clone().start();
    let horizon = Arc::new(horizon);
    let pruner = horizon.clone();
    tasks.push(ScheduledTask::spawn(
        "event_horizon",
        Duration::from_secs(5 * 60),
        Duration::from_secs(config.retention.event_horizon_interval_secs),
        move || {
            let pruner = pruner.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || pruner.prune_db()).await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "Event horizon pass failed"),
                    Err(e) => error!(error = %e, "Event horizon task panicked"),
                }
            }
        },
    ));

    if config.inbound.enabled {
        let bind = format!("{}:{}", config.inbound.bind, config.node.port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("binding {}", bind))?;
        let state = Arc::new(InboundState::new(
            identity.clone(),
            store.clone(),
            config.pow.own_page,
        ));
        let router = inbound::create_router(state, &config.node.sublocation);
        tokio::spawn(async move {
            if let Err(e) = inbound::serve(listener, router).await {
                error!(error = %e, "Inbound surface stopped");
            }
        });
    } else {
        info!("Inbound surface is disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    for task in tasks {
        let name = task.name();
        task.stop().await;
        info!(task = name, "Stopped");
    }
    Ok(())
}
