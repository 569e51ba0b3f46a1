//! rbgd - role-based group controller daemon

use clap::Parser;
use rbg_daemon::{DaemonConfig, DaemonError, DaemonResult};
use rbg_store::Client;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// RBG Daemon CLI
#[derive(Parser)]
#[command(name = "rbgd")]
#[command(about = "RBG Daemon - converges role-based groups", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RBG_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "RBG_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "RBG_LOG_JSON")]
    json_logs: bool,

    /// Reconcile passes per loop running at once
    #[arg(long)]
    max_concurrent_reconciles: Option<usize>,

    /// Directory of YAML manifests to seed the store with
    #[arg(long)]
    manifests: Option<String>,

    /// Schema to report as registered; repeat for each one
    #[arg(long = "registered-schema")]
    registered_schemas: Vec<String>,
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
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
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    if let Some(max) = cli.max_concurrent_reconciles {
        if max == 0 {
            return Err(DaemonError::Config(
                "--max-concurrent-reconciles must be positive".to_string(),
            ));
        }
        config.controller.max_concurrent_reconciles = max;
    }
    if cli.manifests.is_some() {
        config.manifests = cli.manifests;
    }
    if !cli.registered_schemas.is_empty() {
        config.registered_schemas = cli.registered_schemas;
    }

    init_tracing(&config.logging.level, config.logging.json);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        max_concurrent = config.controller.max_concurrent_reconciles,
        "Starting rbgd"
    );

    rbg_daemon::run(config, Client::in_memory(), shutdown_signal()).await?;
    tracing::info!("rbgd stopped");
    Ok(())
}
