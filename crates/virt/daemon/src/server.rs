//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use std::sync::Arc;
use tokio::net::TcpListener;
use virt_admission::{
    builtin_admitters, AdmissionDispatcher, IdentityCapabilityResolver, InMemoryLookup, LabelGuard,
    StaticConfigSource, ValidationEngine,
};

/// Wire the admission core from configuration
pub fn build_state(config: &DaemonConfig) -> DaemonResult<AppState> {
    let cluster = config.cluster.to_cluster_config()?;
    let engine = ValidationEngine::new().map_err(|e| DaemonError::Config(e.to_string()))?;
    let lookup = Arc::new(InMemoryLookup::new());
    let labels = LabelGuard::from_config(&config.authorization);

    let dispatcher = AdmissionDispatcher::with_admitters(
        Arc::new(IdentityCapabilityResolver::new(config.authorization.clone())),
        Arc::new(StaticConfigSource::new(cluster)),
        builtin_admitters(engine, lookup.clone(), labels),
    )
    .with_emit_records(config.server.emit_records);

    Ok(AppState::new(Arc::new(dispatcher), lookup))
}

/// Admission daemon server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let state = build_state(&config)?;
        Ok(Self { config, state })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let admitters = self.state.dispatcher.list_admitters().await;

        let app = create_router(self.state, &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(addr = %addr, admitters = ?admitters, "Admission daemon listening");

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Admission daemon shutting down");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterSection;

    #[tokio::test]
    async fn test_build_state_registers_builtin_admitters() {
        let state = build_state(&DaemonConfig::default()).unwrap();
        assert_eq!(
            state.dispatcher.list_admitters().await,
            vec!["vmi", "vm", "migration", "eviction"]
        );
    }

    #[test]
    fn test_build_state_rejects_bad_cluster_section() {
        let config = DaemonConfig {
            cluster: ClusterSection {
                feature_gates: vec!["NotAGate".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(Server::new(config), Err(DaemonError::Config(_))));
    }
}
