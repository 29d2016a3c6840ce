//! Cluster-wide configuration snapshot
//!
//! A [`ClusterConfig`] is read once per admission request and never mutated
//! while the request is evaluated.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Feature gates consulted by validation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureGate {
    Gpu,
    HostDevices,
    HostDisk,
    ExperimentalIgnitionSupport,
    Sidecar,
    Macvtap,
    Passt,
    Numa,
    MultiArchitecture,
    ExperimentalVirtiofsSupport,
    DownwardMetrics,
    WorkloadEncryptionSev,
    Vsock,
    PersistentReservation,
    VmPersistentState,
    NetworkBindingPlugins,
    VolumesUpdateStrategy,
    VolumeMigration,
    DeclarativeHotplugVolumes,
    DecentralizedLiveMigration,
}

impl FeatureGate {
    /// Every gate
    pub const ALL: [FeatureGate; 20] = [
        FeatureGate::Gpu,
        FeatureGate::HostDevices,
        FeatureGate::HostDisk,
        FeatureGate::ExperimentalIgnitionSupport,
        FeatureGate::Sidecar,
        FeatureGate::Macvtap,
        FeatureGate::Passt,
        FeatureGate::Numa,
        FeatureGate::MultiArchitecture,
        FeatureGate::ExperimentalVirtiofsSupport,
        FeatureGate::DownwardMetrics,
        FeatureGate::WorkloadEncryptionSev,
        FeatureGate::Vsock,
        FeatureGate::PersistentReservation,
        FeatureGate::VmPersistentState,
        FeatureGate::NetworkBindingPlugins,
        FeatureGate::VolumesUpdateStrategy,
        FeatureGate::VolumeMigration,
        FeatureGate::DeclarativeHotplugVolumes,
        FeatureGate::DecentralizedLiveMigration,
    ];

    /// Name of the gate in cluster configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpu => "GPU",
            Self::HostDevices => "HostDevices",
            Self::HostDisk => "HostDisk",
            Self::ExperimentalIgnitionSupport => "ExperimentalIgnitionSupport",
            Self::Sidecar => "Sidecar",
            Self::Macvtap => "Macvtap",
            Self::Passt => "Passt",
            Self::Numa => "NUMA",
            Self::MultiArchitecture => "MultiArchitecture",
            Self::ExperimentalVirtiofsSupport => "ExperimentalVirtiofsSupport",
            Self::DownwardMetrics => "DownwardMetrics",
            Self::WorkloadEncryptionSev => "WorkloadEncryptionSEV",
            Self::Vsock => "VSOCK",
            Self::PersistentReservation => "PersistentReservation",
            Self::VmPersistentState => "VMPersistentState",
            Self::NetworkBindingPlugins => "NetworkBindingPlugins",
            Self::VolumesUpdateStrategy => "VolumesUpdateStrategy",
            Self::VolumeMigration => "VolumeMigration",
            Self::DeclarativeHotplugVolumes => "DeclarativeHotplugVolumes",
            Self::DecentralizedLiveMigration => "DecentralizedLiveMigration",
        }
    }
}

impl fmt::Display for FeatureGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|gate| gate.as_str() == s)
            .ok_or_else(|| format!("unknown feature gate: {s}"))
    }
}

/// Eviction strategy values
pub mod eviction_strategy {
    pub const LIVE_MIGRATE: &str = "LiveMigrate";
    pub const LIVE_MIGRATE_IF_POSSIBLE: &str = "LiveMigrateIfPossible";
    pub const NONE: &str = "None";
    pub const EXTERNAL: &str = "External";

    /// Every accepted value
    pub const ALL: [&str; 4] = [LIVE_MIGRATE, LIVE_MIGRATE_IF_POSSIBLE, NONE, EXTERNAL];
}

/// Machine type pattern, compiled when the configuration is built
///
/// Patterns match anywhere in the machine type. Two patterns are equal when
/// their source text is.
#[derive(Debug, Clone)]
pub struct MachinePattern {
    source: String,
    regex: Regex,
}

impl MachinePattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    /// Whether the machine type matches
    pub fn is_match(&self, machine_type: &str) -> bool {
        self.regex.is_match(machine_type)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for MachinePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for MachinePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for MachinePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for MachinePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Compile built-in patterns
fn builtin_patterns(sources: &[&str]) -> Vec<MachinePattern> {
    sources.iter().filter_map(|s| MachinePattern::new(s).ok()).collect()
}

/// Read-only snapshot of cluster policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Enabled feature gates by configuration name
    pub feature_gates: BTreeSet<String>,

    /// Architecture assumed when a spec names none
    pub default_architecture: String,

    /// Allowed machine type patterns per architecture
    pub emulated_machines: BTreeMap<String, Vec<MachinePattern>>,

    /// Whether slirp interfaces are allowed
    pub permit_slirp_interface: bool,

    /// Whether bridge interfaces may attach to the pod network
    pub permit_bridge_interface_on_pod_network: bool,

    /// Whether the DataVolume API is installed
    pub data_volume_api_present: bool,

    /// Whether spec changes roll out live to running instances
    pub live_update: bool,

    /// Cluster default eviction strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_strategy: Option<String>,

    /// Registered network binding plugins
    pub network_binding_plugins: BTreeSet<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let emulated_machines = BTreeMap::from([
            ("amd64".to_string(), builtin_patterns(&["q35*", "pc-q35*"])),
            ("arm64".to_string(), builtin_patterns(&["virt*"])),
            ("s390x".to_string(), builtin_patterns(&["s390-ccw-virtio*"])),
        ]);
        Self {
            feature_gates: BTreeSet::new(),
            default_architecture: "amd64".to_string(),
            emulated_machines,
            permit_slirp_interface: false,
            permit_bridge_interface_on_pod_network: true,
            data_volume_api_present: true,
            live_update: false,
            eviction_strategy: None,
            network_binding_plugins: BTreeSet::new(),
        }
    }
}

impl ClusterConfig {
    /// Whether a gate is enabled
    pub fn is_enabled(&self, gate: FeatureGate) -> bool {
        self.feature_gates.contains(gate.as_str())
    }

    /// Enable a gate
    pub fn with_gate(mut self, gate: FeatureGate) -> Self {
        self.feature_gates.insert(gate.as_str().to_string());
        self
    }

    /// Enable live update rollouts
    pub fn with_live_update(mut self, enabled: bool) -> Self {
        self.live_update = enabled;
        self
    }

    /// Machine type patterns for an architecture, falling back to the default
    pub fn emulated_machines_for(&self, architecture: Option<&str>) -> &[MachinePattern] {
        let arch = architecture
            .filter(|a| !a.is_empty())
            .unwrap_or(self.default_architecture.as_str());
        self.emulated_machines
            .get(arch)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
