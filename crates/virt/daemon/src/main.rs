//! Virt Admission Daemon - admission webhook for virtual-machine workloads
//!
//! The daemon provides:
//! - `AdmissionReview` validation over HTTP
//! - An in-memory store for the objects admission looks up
//! - Health and status endpoints

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use virt_admission_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};

/// Virt Admission Daemon CLI
#[derive(Parser)]
#[command(name = "virt-admissiond")]
#[command(about = "Virt Admission Daemon - validates virtual-machine workloads", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VIRT_ADMISSION_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "VIRT_ADMISSION_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level, overrides the configuration file
    #[arg(long, env = "VIRT_ADMISSION_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "VIRT_ADMISSION_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
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
        listen = %config.server.listen_addr,
        feature_gates = ?config.cluster.feature_gates,
        "Starting virt-admissiond"
    );

    // Create and run server
    let server = Server::new(config)?;
    server.run().await
}
