//! anchord: the Anchor daemon.
//!
//! Single binary that assembles the control plane:
//! - Entity store (redb, on disk or in memory)
//! - HTTP fan-out pool towards edge agents
//! - Liveness scheduler
//! - Node, group, app, deployment and notification controllers
//! - REST API
//!
//! # Usage
//!
//! ```text
//! anchord serve --config /etc/anchor/anchord.toml --port 48099
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anchor_client::HttpPool;
use anchor_orchestrator::Anchor;
use anchor_state::StateStore;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AnchorConfig;

const DEFAULT_LOG_FILTER: &str = "info,anchord=debug,anchor=debug";

#[derive(Parser)]
#[command(name = "anchord", about = "Anchor edge fleet control plane")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the management, search and notification API.
    Serve {
        /// Path to the TOML config file.
        #[arg(long, default_value = "/etc/anchor/anchord.toml")]
        config: PathBuf,

        /// Port to listen on (overrides `[server] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Directory holding anchor.redb (overrides `[store] path`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep all state in memory.
        #[arg(long)]
        in_memory: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            in_memory,
        } => {
            let mut settings = AnchorConfig::load(&config)?;
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(dir) = data_dir {
                settings.store.path = dir.join("anchor.redb");
            }
            settings.store.in_memory |= in_memory;
            info!(config = ?config, "configuration loaded");
            run_serve(settings).await
        }
    }
}

fn open_store(settings: &AnchorConfig) -> anyhow::Result<StateStore> {
    if settings.store.in_memory {
        let state = StateStore::open_in_memory()?;
        info!("in-memory store opened");
        return Ok(state);
    }
    if let Some(parent) = settings.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let state = StateStore::open(&settings.store.path)?;
    info!(path = ?settings.store.path, "store opened");
    Ok(state)
}

async fn run_serve(settings: AnchorConfig) -> anyhow::Result<()> {
    info!("Anchor daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let state = open_store(&settings)?;

    let pool_config = settings.pool();
    info!(
        timeout_secs = pool_config.request_timeout.as_secs(),
        max_concurrency = pool_config.max_concurrency,
        agent_port = settings.agent.port,
        "agent pool initialized"
    );
    let transport = Arc::new(HttpPool::new(pool_config));

    let anchor = Arc::new(Anchor::new(state, transport, settings.options()));
    info!(
        unit_secs = settings.liveness.unit_secs,
        max_network_latency = settings.liveness.max_network_latency,
        "controllers initialized"
    );

    // ── Start API server ───────────────────────────────────────

    let router = anchor_api::build_router(Arc::clone(&anchor));
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c, shutting down");
            }
            info!("shutdown signal received");
        })
        .await?;

    anchor.shutdown().await;

    info!("Anchor daemon stopped");
    Ok(())
}
