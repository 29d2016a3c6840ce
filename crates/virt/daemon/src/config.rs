//! Configuration for virt-admission-daemon

use crate::error::{DaemonError, DaemonResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use virt_admission::AuthorizationConfig;
use virt_types::cluster::eviction_strategy;
use virt_types::{ClusterConfig, FeatureGate, MachinePattern};

/// Environment variable prefix, e.g. `VIRT_ADMISSION_SERVER__LISTEN_ADDR`
pub const ENV_PREFIX: &str = "VIRT_ADMISSION";

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Cluster policy handed to every admission
    #[serde(default)]
    pub cluster: ClusterSection,

    /// Who may do what
    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default)]
    pub enable_cors: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Log one record per admission
    #[serde(default = "default_true")]
    pub emit_records: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: false,
            request_timeout_secs: default_request_timeout(),
            max_body_size: default_max_body_size(),
            emit_records: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Cluster policy as written in configuration files
///
/// Mirrors [`ClusterConfig`] with snake_case keys so files and environment
/// variables share one spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    pub feature_gates: Vec<String>,
    pub default_architecture: String,
    pub emulated_machines: BTreeMap<String, Vec<String>>,
    pub permit_slirp_interface: bool,
    pub permit_bridge_interface_on_pod_network: bool,
    pub data_volume_api_present: bool,
    pub live_update: bool,
    pub eviction_strategy: Option<String>,
    pub network_binding_plugins: Vec<String>,
}

impl Default for ClusterSection {
    fn default() -> Self {
        let defaults = ClusterConfig::default();
        Self {
            feature_gates: defaults.feature_gates.into_iter().collect(),
            default_architecture: defaults.default_architecture,
            emulated_machines: defaults
                .emulated_machines
                .into_iter()
                .map(|(arch, patterns)| (arch, patterns.iter().map(|p| p.as_str().to_string()).collect()))
                .collect(),
            permit_slirp_interface: defaults.permit_slirp_interface,
            permit_bridge_interface_on_pod_network: defaults.permit_bridge_interface_on_pod_network,
            data_volume_api_present: defaults.data_volume_api_present,
            live_update: defaults.live_update,
            eviction_strategy: defaults.eviction_strategy,
            network_binding_plugins: defaults.network_binding_plugins.into_iter().collect(),
        }
    }
}

impl ClusterSection {
    /// Build the snapshot admitters read, rejecting unknown gates, unknown
    /// strategies and machine patterns that do not compile
    pub fn to_cluster_config(&self) -> DaemonResult<ClusterConfig> {
        for gate in &self.feature_gates {
            FeatureGate::from_str(gate).map_err(DaemonError::Config)?;
        }
        if let Some(strategy) = self.eviction_strategy.as_deref() {
            if !eviction_strategy::ALL.contains(&strategy) {
                return Err(DaemonError::Config(format!(
                    "unknown eviction strategy: {strategy}"
                )));
            }
        }
        if self.default_architecture.is_empty() {
            return Err(DaemonError::Config(
                "default architecture must not be empty".to_string(),
            ));
        }

        let mut emulated_machines = BTreeMap::new();
        for (arch, sources) in &self.emulated_machines {
            let patterns = sources
                .iter()
                .map(|source| {
                    MachinePattern::new(source).map_err(|e| {
                        DaemonError::Config(format!("invalid emulated machine pattern '{source}': {e}"))
                    })
                })
                .collect::<DaemonResult<Vec<_>>>()?;
            emulated_machines.insert(arch.clone(), patterns);
        }

        Ok(ClusterConfig {
            feature_gates: self.feature_gates.iter().cloned().collect(),
            default_architecture: self.default_architecture.clone(),
            emulated_machines,
            permit_slirp_interface: self.permit_slirp_interface,
            permit_bridge_interface_on_pod_network: self.permit_bridge_interface_on_pod_network,
            data_volume_api_present: self.data_volume_api_present,
            live_update: self.live_update,
            eviction_strategy: self.eviction_strategy.clone(),
            network_binding_plugins: self.network_binding_plugins.iter().cloned().collect(),
        })
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8443))
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_body_size() -> usize {
    3 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with VIRT_ADMISSION_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8443);
        assert_eq!(config.server.request_timeout_secs, 10);
        assert!(config.server.emit_records);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.authorization, AuthorizationConfig::default());
    }

    #[test]
    fn test_cluster_section_matches_defaults() {
        let cluster = ClusterSection::default().to_cluster_config().unwrap();
        assert_eq!(cluster, ClusterConfig::default());
    }

    #[test]
    fn test_cluster_section_gates() {
        let section = ClusterSection {
            feature_gates: vec!["Sidecar".into(), "GPU".into()],
            eviction_strategy: Some(eviction_strategy::LIVE_MIGRATE.into()),
            ..Default::default()
        };
        let cluster = section.to_cluster_config().unwrap();
        assert!(cluster.is_enabled(FeatureGate::Sidecar));
        assert!(cluster.is_enabled(FeatureGate::Gpu));
        assert!(!cluster.is_enabled(FeatureGate::HostDisk));
        assert_eq!(cluster.eviction_strategy.as_deref(), Some("LiveMigrate"));
    }

    #[test]
    fn test_cluster_section_rejects_unknown_values() {
        let section = ClusterSection {
            feature_gates: vec!["Teleport".into()],
            ..Default::default()
        };
        assert!(matches!(section.to_cluster_config(), Err(DaemonError::Config(_))));

        let section = ClusterSection {
            eviction_strategy: Some("Sometimes".into()),
            ..Default::default()
        };
        let err = section.to_cluster_config().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: unknown eviction strategy: Sometimes");
    }

    #[test]
    fn test_cluster_section_compiles_machine_patterns() {
        let mut section = ClusterSection::default();
        section
            .emulated_machines
            .insert("amd64".into(), vec!["pc-i440fx*".into()]);
        let cluster = section.to_cluster_config().unwrap();
        assert!(cluster.emulated_machines_for(None)[0].is_match("pc-i440fx-2.12"));

        section.emulated_machines.insert("amd64".into(), vec!["q35(".into()]);
        let err = section.to_cluster_config().unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
        assert!(err
            .to_string()
            .starts_with("Configuration error: invalid emulated machine pattern 'q35('"));
    }

    #[test]
    fn test_load_without_file() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.cluster, ClusterSection::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("virt-admissiond-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[server]
listen_addr = "0.0.0.0:9443"
request_timeout_secs = 5

[cluster]
feature_gates = ["Sidecar"]
live_update = true

[authorization]
privileged_groups = ["system:masters"]
"#,
        )
        .unwrap();

        let loaded = DaemonConfig::load(path.to_str());
        std::fs::remove_file(&path).unwrap();
        let config = loaded.unwrap();

        assert_eq!(config.server.listen_addr.port(), 9443);
        assert_eq!(config.server.request_timeout_secs, 5);
        assert_eq!(config.server.max_body_size, default_max_body_size());
        assert_eq!(config.cluster.feature_gates, vec!["Sidecar".to_string()]);
        assert!(config.cluster.live_update);
        assert_eq!(config.cluster.default_architecture, "amd64");
        assert_eq!(config.authorization.privileged_groups, vec!["system:masters".to_string()]);
        assert_eq!(
            config.authorization.privileged_users,
            AuthorizationConfig::default().privileged_users
        );
    }
}
