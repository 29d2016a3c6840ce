//! Virtual machine instances
//!
//! A [`VirtualMachineInstance`] is a single running guest. Its spec is the
//! object every validation rule reads.

use crate::devices::{Disk, Interface};
use crate::domain::DomainSpec;
use crate::meta::{Marker, ObjectMeta};
use crate::network::Network;
use crate::probe::Probe;
use crate::volume::{AccessCredential, Volume};
use serde::{Deserialize, Serialize};

/// Phases after which an instance never runs again
pub const FINAL_PHASES: &[&str] = &["Succeeded", "Failed"];

/// Condition type reporting whether an instance can be live migrated
pub const CONDITION_MIGRATABLE: &str = "LiveMigratable";

/// A running virtual machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachineInstance {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineInstanceSpec,
    pub status: VirtualMachineInstanceStatus,
}

impl VirtualMachineInstance {
    /// Instance with the given name, namespace and spec
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: VirtualMachineInstanceSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(name, namespace),
            spec,
            status: VirtualMachineInstanceStatus::default(),
        }
    }

    /// Whether the instance has reached a final phase
    pub fn is_final(&self) -> bool {
        self.status
            .phase
            .as_deref()
            .is_some_and(|phase| FINAL_PHASES.contains(&phase))
    }

    /// Whether a migration is in flight
    pub fn is_migrating(&self) -> bool {
        self.status
            .migration_state
            .as_ref()
            .is_some_and(|state| !state.completed && !state.failed)
    }
}

/// Desired configuration of an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    pub domain: DomainSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub access_credentials: Vec<AccessCredential>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Start paused instead of running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_strategy: Option<String>,

    /// Guest CPU architecture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// What happens on node drain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_strategy: Option<String>,

    #[serde(rename = "dnsPolicy", skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,

    #[serde(rename = "dnsConfig", skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDnsConfig>,
}

impl VirtualMachineInstanceSpec {
    /// Look up a volume by name
    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }

    /// Look up a disk by name
    pub fn disk(&self, name: &str) -> Option<&Disk> {
        self.domain.devices.disks.iter().find(|d| d.name == name)
    }

    /// Look up a network by name
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// The pod network, if one is declared
    pub fn pod_network(&self) -> Option<&Network> {
        self.networks.iter().find(|n| n.pod.is_some())
    }

    /// Interfaces connected to a pod network
    pub fn pod_interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.domain
            .devices
            .interfaces
            .iter()
            .filter(|iface| self.network(&iface.name).is_some_and(|n| n.pod.is_some()))
    }
}

/// DNS settings for the guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodDnsConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub searches: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<PodDnsConfigOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodDnsConfigOption {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Observed state of an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Node currently hosting the instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_state: Option<MigrationState>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_status: Vec<VolumeStatus>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Node being drained of this instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evacuation_node_name: Option<String>,
}

impl VirtualMachineInstanceStatus {
    /// Names of volumes that were hotplugged
    pub fn hotplugged_volumes(&self) -> impl Iterator<Item = &str> {
        self.volume_status
            .iter()
            .filter(|s| s.hotplug_volume.is_some())
            .map(|s| s.name.as_str())
    }

    /// Condition of the given type, if reported
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Progress of a live migration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationState {
    #[serde(rename = "migrationUid", skip_serializing_if = "String::is_empty")]
    pub migration_uid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_node: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_node: String,
    pub completed: bool,
    pub failed: bool,
}

/// Attachment state of a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeStatus {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotplug_volume: Option<HotplugVolumeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_dump_volume: Option<Marker>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HotplugVolumeStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub attach_pod_name: String,
}

/// A reported status condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::InterfaceBinding;

    #[test]
    fn test_pod_interfaces() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.networks = vec![Network::pod("default"), Network::multus("blue", "blue-net")];
        spec.domain.devices.interfaces = vec![
            Interface::new("default", InterfaceBinding::Masquerade),
            Interface::new("blue", InterfaceBinding::Bridge),
        ];
        let names: Vec<_> = spec.pod_interfaces().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["default"]);
    }

    #[test]
    fn test_migrating_and_final() {
        let mut vmi = VirtualMachineInstance::default();
        assert!(!vmi.is_migrating());
        vmi.status.migration_state = Some(MigrationState {
            target_node: "node02".into(),
            ..Default::default()
        });
        assert!(vmi.is_migrating());

        vmi.status.phase = Some("Succeeded".into());
        assert!(vmi.is_final());
    }
}
