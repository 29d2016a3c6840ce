//! Volumes and access credentials

use crate::meta::Marker;
use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};

/// A named volume and its source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    pub name: String,

    #[serde(flatten)]
    pub source: VolumeSource,
}

impl Volume {
    /// Volume backed by a persistent volume claim
    pub fn pvc(name: impl Into<String>, claim: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VolumeSource {
                persistent_volume_claim: Some(PvcSource {
                    claim_name: claim.into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    /// Volume backed by a data volume
    pub fn data_volume(name: impl Into<String>, data_volume: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VolumeSource {
                data_volume: Some(DataVolumeSource {
                    name: data_volume.into(),
                    hotpluggable: false,
                }),
                ..Default::default()
            },
        }
    }

    /// Volume backed by a container image
    pub fn container_disk(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VolumeSource {
                container_disk: Some(ContainerDiskSource {
                    image: image.into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    /// Whether the volume holds a memory dump
    pub fn is_memory_dump(&self) -> bool {
        self.source.memory_dump.is_some()
    }

    /// Whether the volume can be hotplugged
    pub fn is_claim_backed(&self) -> bool {
        self.source.persistent_volume_claim.is_some() || self.source.data_volume.is_some()
    }
}

/// Where a volume's data comes from. Exactly one member should be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_config_drive: Option<CloudInitSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_disk: Option<HostDisk>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downward_metrics: Option<Marker>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_dump: Option<PvcSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_disk: Option<EmptyDiskSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<EphemeralSource>,
}

impl VolumeSource {
    /// Number of source types set
    pub fn count(&self) -> usize {
        [
            self.container_disk.is_some(),
            self.persistent_volume_claim.is_some(),
            self.data_volume.is_some(),
            self.cloud_init_no_cloud.is_some(),
            self.cloud_init_config_drive.is_some(),
            self.host_disk.is_some(),
            self.config_map.is_some(),
            self.secret.is_some(),
            self.service_account.is_some(),
            self.downward_metrics.is_some(),
            self.memory_dump.is_some(),
            self.empty_disk.is_some(),
            self.ephemeral.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,
    /// Path of the disk image inside the container
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PvcSource {
    pub claim_name: String,
    pub read_only: bool,
    pub hotpluggable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataVolumeSource {
    pub name: String,
    pub hotpluggable: bool,
}

/// Cloud-init user and network data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CloudInitSource {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_data: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_data_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_data: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_data_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_data_secret_ref: Option<LocalObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Host disk type values
pub mod host_disk_type {
    pub const DISK: &str = "Disk";
    pub const DISK_OR_CREATE: &str = "DiskOrCreate";
}

/// A disk image on the host filesystem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostDisk {
    pub path: String,
    #[serde(rename = "type")]
    pub disk_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigMapSource {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceAccountSource {
    pub service_account_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmptyDiskSource {
    pub capacity: Quantity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EphemeralSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcSource>,
}

/// Credentials injected into the guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessCredential {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<SshPublicKeyCredential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_password: Option<UserPasswordCredential>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SshPublicKeyCredential {
    pub source: CredentialSource,
    pub propagation_method: SshPropagationMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserPasswordCredential {
    pub source: CredentialSource,
    pub propagation_method: PasswordPropagationMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SshPropagationMethod {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_cloud: Option<Marker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<Marker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qemu_guest_agent: Option<GuestAgentUsers>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestAgentUsers {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PasswordPropagationMethod {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qemu_guest_agent: Option<Marker>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_source_is_flattened() {
        let volume: Volume = serde_json::from_value(serde_json::json!({
            "name": "rootdisk",
            "persistentVolumeClaim": {"claimName": "root-pvc"}
        }))
        .unwrap();
        assert_eq!(volume.source.count(), 1);
        assert!(volume.is_claim_backed());
        assert_eq!(
            serde_json::to_value(&volume).unwrap()["persistentVolumeClaim"]["claimName"],
            "root-pvc"
        );
    }

    #[test]
    fn test_source_count_sees_every_member() {
        let mut volume = Volume::container_disk("cd", "registry/image");
        volume.source.cloud_init_no_cloud = Some(CloudInitSource::default());
        assert_eq!(volume.source.count(), 2);
        assert_eq!(Volume::default().source.count(), 0);
    }
}
