//! arenad — the Chaos Arena daemon.
//!
//! Single binary that assembles the session engine:
//! - Control plane (Kubernetes, or an in-memory simulation)
//! - Session manager + load emitters
//! - Stream controller
//! - REST + WebSocket API
//!
//! # Usage
//!
//! ```text
//! arenad serve --port 8000 --config arena.toml
//! arenad serve --simulate --log-format json
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arena_api::{AppState, build_router};
use arena_cluster::{ControlPlane, InMemoryControlPlane, KubeControlPlane};
use arena_core::ArenaConfig;
use arena_session::SessionManager;

const DEFAULT_LOG_FILTER: &str = "info,arenad=debug,arena=debug";

#[derive(Parser)]
#[command(name = "arenad", about = "Chaos Arena daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the session API.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8000")]
        port: u16,

        /// TOML config file. Environment variables override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run against an in-memory simulated cluster.
        #[arg(long)]
        simulate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            port,
            config,
            simulate,
        } => run_serve(port, config.as_deref(), simulate).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_serve(port: u16, config_path: Option<&Path>, simulate: bool) -> anyhow::Result<()> {
    info!("Chaos Arena daemon starting");

    let config = ArenaConfig::load(config_path)?;
    info!(
        domain = %config.domain,
        namespace = %config.namespace,
        chaos_namespace = %config.chaos_namespace(),
        delete_interval = config.delete_interval,
        load_increment = config.load_increment,
        "configuration loaded"
    );

    // ── Control plane ──────────────────────────────────────────

    let cluster: Arc<dyn ControlPlane> = if simulate {
        warn!(replicas = config.simulated_replicas, "using simulated cluster");
        Arc::new(InMemoryControlPlane::with_replicas(config.simulated_replicas))
    } else {
        Arc::new(KubeControlPlane::connect().await?)
    };

    let config = Arc::new(config);
    let manager = Arc::new(SessionManager::with_http(cluster, config.clone()));

    // ── API server ─────────────────────────────────────────────

    let router = build_router(AppState::new(manager.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    // Sessions whose streams were cut by the shutdown still own cluster resources.
    for view in manager.sessions().await {
        if let Err(e) = manager.kill(&view.session_id).await {
            error!(session_id = %view.session_id, error = %e, "teardown on shutdown failed");
        }
    }

    info!("Chaos Arena daemon stopped");
    Ok(())
}
