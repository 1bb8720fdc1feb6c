//! Fleet Daemon - cluster health reconciliation service

use clap::Parser;
use fleet_daemon::{shutdown_signal, Daemon, DaemonConfig, DaemonError, DaemonResult};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fleet Daemon CLI
#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "Fleet Daemon - cluster health reconciliation service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLEET_CONFIG")]
    config: Option<String>,

    /// Number of reconcile workers
    #[arg(short, long, env = "FLEET_WORKERS")]
    workers: Option<usize>,

    /// Allowed workspace (repeatable, `*` for all)
    #[arg(long = "workspace", env = "FLEET_WORKSPACES", value_delimiter = ',')]
    workspaces: Vec<String>,

    /// Cluster to monitor as `workspace|resource` (repeatable)
    #[arg(long = "cluster", env = "FLEET_CLUSTERS", value_delimiter = ',')]
    clusters: Vec<String>,

    /// Log level
    #[arg(long, env = "FLEET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "FLEET_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(workers) = cli.workers {
        config.controller.worker_count = workers;
    }
    if !cli.workspaces.is_empty() {
        config.controller.allowed_workspaces = cli.workspaces;
    }
    config.health.clusters.extend(cli.clusters);
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        controller = %config.controller.name,
        workers = config.controller.worker_count,
        workspaces = ?config.controller.allowed_workspaces,
        "Fleet daemon configured"
    );

    let daemon = Daemon::new(config)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    daemon.run(cancel).await
}
