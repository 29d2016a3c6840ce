//! Devices attached to a domain

use crate::meta::Marker;
use serde::{Deserialize, Serialize};

/// Disk bus names
pub mod bus {
    pub const VIRTIO: &str = "virtio";
    pub const SCSI: &str = "scsi";
    pub const SATA: &str = "sata";
    pub const USB: &str = "usb";
    pub const IDE: &str = "ide";
}

/// All devices attached to a domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Devices {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filesystems: Vec<Filesystem>,

    #[serde(rename = "gpus", skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<Gpu>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_devices: Vec<HostDevice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<SoundDevice>,

    /// Attach a VSOCK device
    #[serde(rename = "autoattachVSOCK", skip_serializing_if = "Option::is_none")]
    pub autoattach_vsock: Option<bool>,

    /// Attach the default pod interface
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoattach_pod_interface: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<Tpm>,

    /// Virtio serial port exposing host metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downward_metrics: Option<Marker>,
}

/// A block device presented to the guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Disk {
    /// Name of the volume backing the disk
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub io: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_policy: Option<String>,

    /// Give the disk its own IO thread
    #[serde(rename = "dedicatedIOThread", skip_serializing_if = "Option::is_none")]
    pub dedicated_io_thread: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shareable: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<BlockSize>,

    /// Plain disk target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,

    /// SCSI LUN target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lun: Option<LunTarget>,

    /// CD-ROM target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdrom: Option<CdRomTarget>,
}

impl Disk {
    /// A plain disk on the given bus
    pub fn new(name: impl Into<String>, bus: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disk: Some(DiskTarget {
                bus: bus.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Number of target types set
    pub fn target_count(&self) -> usize {
        usize::from(self.disk.is_some())
            + usize::from(self.lun.is_some())
            + usize::from(self.cdrom.is_some())
    }

    /// Bus of whichever target is set
    pub fn bus(&self) -> &str {
        if let Some(disk) = &self.disk {
            &disk.bus
        } else if let Some(lun) = &self.lun {
            &lun.bus
        } else if let Some(cdrom) = &self.cdrom {
            &cdrom.bus
        } else {
            ""
        }
    }

    /// Whether the disk is a CD-ROM
    pub fn is_cdrom(&self) -> bool {
        self.cdrom.is_some()
    }

    /// Whether the disk requests a dedicated IO thread
    pub fn wants_dedicated_io_thread(&self) -> bool {
        self.dedicated_io_thread.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiskTarget {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bus: String,
    pub read_only: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pci_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LunTarget {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bus: String,
    pub read_only: bool,
    /// SCSI persistent reservation
    pub reservation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CdRomTarget {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bus: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tray: Option<String>,
}

/// Block size reported to the guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockSize {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomBlockSize>,
    /// Match the block size of the backing volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_volume: Option<crate::domain::FeatureState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomBlockSize {
    pub logical: u32,
    pub physical: u32,
}

/// How an interface is bound to its network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceBinding {
    Bridge,
    Slirp,
    Masquerade,
    Sriov,
    Macvtap,
    Passt,
    /// Binding provided by a named network binding plugin
    Plugin(String),
}

/// A network interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Interface {
    /// Name of the network the interface connects to
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub mac_address: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub pci_address: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_options: Option<DhcpOptions>,

    /// Ports forwarded from the pod network
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<Marker>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slirp: Option<Marker>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<Marker>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sriov: Option<Marker>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub macvtap: Option<Marker>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub passt: Option<Marker>,

    /// Network binding plugin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<PluginBinding>,
}

impl Interface {
    /// An interface using the given binding
    pub fn new(name: impl Into<String>, binding: InterfaceBinding) -> Self {
        let mut iface = Self {
            name: name.into(),
            ..Default::default()
        };
        match binding {
            InterfaceBinding::Bridge => iface.bridge = Some(Marker {}),
            InterfaceBinding::Slirp => iface.slirp = Some(Marker {}),
            InterfaceBinding::Masquerade => iface.masquerade = Some(Marker {}),
            InterfaceBinding::Sriov => iface.sriov = Some(Marker {}),
            InterfaceBinding::Macvtap => iface.macvtap = Some(Marker {}),
            InterfaceBinding::Passt => iface.passt = Some(Marker {}),
            InterfaceBinding::Plugin(name) => iface.binding = Some(PluginBinding { name }),
        }
        iface
    }

    /// Binding method in use, if any
    pub fn binding_method(&self) -> Option<InterfaceBinding> {
        if self.bridge.is_some() {
            Some(InterfaceBinding::Bridge)
        } else if self.slirp.is_some() {
            Some(InterfaceBinding::Slirp)
        } else if self.masquerade.is_some() {
            Some(InterfaceBinding::Masquerade)
        } else if self.sriov.is_some() {
            Some(InterfaceBinding::Sriov)
        } else if self.macvtap.is_some() {
            Some(InterfaceBinding::Macvtap)
        } else if self.passt.is_some() {
            Some(InterfaceBinding::Passt)
        } else {
            self.binding
                .as_ref()
                .map(|b| InterfaceBinding::Plugin(b.name.clone()))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginBinding {
    pub name: String,
}

/// A port forwarded to the guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    pub port: i32,
}

/// DHCP options served to the guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DhcpOptions {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub boot_file_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tftp_server_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ntp_servers: Vec<String>,
    #[serde(rename = "privateOptions", skip_serializing_if = "Vec::is_empty")]
    pub private_options: Vec<DhcpPrivateOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DhcpPrivateOption {
    pub option: i32,
    pub value: String,
}

/// An input device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Input {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bus: String,
    #[serde(rename = "type")]
    pub input_type: String,
}

/// An emulated sound card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundDevice {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
}

/// A filesystem shared into the guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filesystem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtiofs: Option<Marker>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Gpu {
    pub name: String,
    pub device_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostDevice {
    pub name: String,
    pub device_name: String,
}

/// Emulated TPM
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tpm {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_bus_follows_target() {
        let disk = Disk::new("root", bus::VIRTIO);
        assert_eq!(disk.bus(), "virtio");
        assert_eq!(disk.target_count(), 1);

        let lun = Disk {
            name: "lun0".into(),
            lun: Some(LunTarget {
                bus: bus::SCSI.into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(lun.bus(), "scsi");
        assert!(!lun.is_cdrom());
    }

    #[test]
    fn test_interface_binding_roundtrip() {
        let iface = Interface::new("default", InterfaceBinding::Masquerade);
        assert_eq!(iface.binding_method(), Some(InterfaceBinding::Masquerade));

        let json = serde_json::to_value(&iface).unwrap();
        assert_eq!(json, serde_json::json!({"name": "default", "masquerade": {}}));

        let plugin = Interface::new("sec", InterfaceBinding::Plugin("passt".into()));
        assert_eq!(
            plugin.binding_method(),
            Some(InterfaceBinding::Plugin("passt".into()))
        );
    }
}
