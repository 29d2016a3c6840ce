//! Virtual machines
//!
//! A [`VirtualMachine`] owns a template from which instances are started and
//! the run strategy deciding when that happens.

use crate::devices::Disk;
use crate::meta::ObjectMeta;
use crate::vmi::VirtualMachineInstanceSpec;
use crate::volume::{DataVolumeSource, PvcSource, Volume, VolumeSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// When instances of a virtual machine are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStrategy {
    Halted,
    Manual,
    Always,
    RerunOnFailure,
    Once,
    /// Wait for an incoming decentralized migration
    WaitAsReceiver,
}

impl RunStrategy {
    /// Every known strategy
    pub const ALL: [RunStrategy; 6] = [
        RunStrategy::Halted,
        RunStrategy::Manual,
        RunStrategy::Always,
        RunStrategy::RerunOnFailure,
        RunStrategy::Once,
        RunStrategy::WaitAsReceiver,
    ];

    /// Wire name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Halted => "Halted",
            Self::Manual => "Manual",
            Self::Always => "Always",
            Self::RerunOnFailure => "RerunOnFailure",
            Self::Once => "Once",
            Self::WaitAsReceiver => "WaitAsReceiver",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for RunStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A virtual machine definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachine {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineSpec,
    pub status: VirtualMachineStatus,
}

/// Desired state of a virtual machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Deprecated boolean run switch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<VirtualMachineInstanceTemplate>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_volume_templates: Vec<DataVolumeTemplate>,

    /// How volume changes are rolled out to a running instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_volumes_strategy: Option<String>,
}

/// Update volumes strategy that migrates storage
pub const UPDATE_VOLUMES_STRATEGY_MIGRATION: &str = "Migration";

/// Template an instance is created from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachineInstanceTemplate {
    pub metadata: ObjectMeta,
    pub spec: VirtualMachineInstanceSpec,
}

/// An embedded data volume created alongside the virtual machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataVolumeTemplate {
    pub metadata: ObjectMeta,
    pub spec: DataVolumeSpec,
}

/// Storage and population of a data volume. Storage claims are opaque here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataVolumeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvc: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<serde_json::Value>,

    /// Import source, keyed by source type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<serde_json::Value>,
}

impl DataVolumeSpec {
    /// Whether the claim is populated by an external populator
    pub fn externally_populated(&self) -> bool {
        let claim = self.pvc.as_ref().or(self.storage.as_ref());
        claim.is_some_and(|c| {
            ["dataSourceRef", "dataSource"]
                .iter()
                .any(|key| c.get(key).is_some_and(|v| !v.is_null()))
        })
    }

    /// Number of import sources set
    pub fn source_count(&self) -> usize {
        self.source
            .as_ref()
            .map_or(0, |s| s.values().filter(|v| !v.is_null()).count())
    }
}

/// Observed state of a virtual machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    pub ready: bool,

    /// Name of a snapshot currently being taken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_in_progress: Option<String>,

    /// Name of a restore currently being applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_in_progress: Option<String>,

    /// Pending hotplug requests
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_requests: Vec<VolumeRequest>,
}

/// A request to hotplug or unplug a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_volume_options: Option<AddVolumeOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_volume_options: Option<RemoveVolumeOptions>,
}

impl VolumeRequest {
    /// Apply the request to an instance spec
    pub fn apply_to(&self, spec: &mut VirtualMachineInstanceSpec) {
        if let Some(add) = &self.add_volume_options {
            if spec.volume(&add.name).is_none() {
                let mut volume = add.volume();
                if let Some(pvc) = volume.source.persistent_volume_claim.as_mut() {
                    pvc.hotpluggable = true;
                }
                if let Some(dv) = volume.source.data_volume.as_mut() {
                    dv.hotpluggable = true;
                }
                spec.volumes.push(volume);
            }
            if let Some(disk) = &add.disk {
                if spec.disk(&add.name).is_none() {
                    let mut disk = disk.clone();
                    disk.name = add.name.clone();
                    spec.domain.devices.disks.push(disk);
                }
            }
        } else if let Some(remove) = &self.remove_volume_options {
            spec.volumes.retain(|v| v.name != remove.name);
            spec.domain.devices.disks.retain(|d| d.name != remove.name);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddVolumeOptions {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<Disk>,

    pub volume_source: HotplugVolumeSource,
}

impl AddVolumeOptions {
    /// The volume this request would add
    pub fn volume(&self) -> Volume {
        let mut source = VolumeSource::default();
        if let Some(pvc) = &self.volume_source.persistent_volume_claim {
            source.persistent_volume_claim = Some(pvc.clone());
        } else if let Some(dv) = &self.volume_source.data_volume {
            source.data_volume = Some(dv.clone());
        }
        Volume {
            name: self.name.clone(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HotplugVolumeSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveVolumeOptions {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::bus;

    #[test]
    fn test_run_strategy_parse() {
        assert_eq!(RunStrategy::parse("Always"), Some(RunStrategy::Always));
        assert_eq!(RunStrategy::parse("always"), None);
        assert_eq!(RunStrategy::WaitAsReceiver.to_string(), "WaitAsReceiver");
    }

    #[test]
    fn test_apply_add_and_remove() {
        let mut spec = VirtualMachineInstanceSpec::default();
        let add = VolumeRequest {
            add_volume_options: Some(AddVolumeOptions {
                name: "hp".into(),
                disk: Some(Disk::new("", bus::SCSI)),
                volume_source: HotplugVolumeSource {
                    data_volume: Some(DataVolumeSource {
                        name: "dv".into(),
                        hotpluggable: false,
                    }),
                    ..Default::default()
                },
            }),
            remove_volume_options: None,
        };
        add.apply_to(&mut spec);
        assert_eq!(spec.volumes.len(), 1);
        assert!(spec.volumes[0].source.data_volume.as_ref().unwrap().hotpluggable);
        assert_eq!(spec.domain.devices.disks[0].name, "hp");

        let remove = VolumeRequest {
            add_volume_options: None,
            remove_volume_options: Some(RemoveVolumeOptions { name: "hp".into() }),
        };
        remove.apply_to(&mut spec);
        assert!(spec.volumes.is_empty());
        assert!(spec.domain.devices.disks.is_empty());
    }

    #[test]
    fn test_data_volume_population() {
        let spec: DataVolumeSpec = serde_json::from_value(serde_json::json!({
            "pvc": {"dataSourceRef": {"kind": "VolumeImportSource", "name": "src"}},
            "source": {"http": {"url": "http://example"}, "blank": null}
        }))
        .unwrap();
        assert!(spec.externally_populated());
        assert_eq!(spec.source_count(), 1);
    }
}
