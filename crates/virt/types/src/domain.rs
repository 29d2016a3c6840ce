//! Domain specification: compute, memory, firmware and guest features

use crate::devices::Devices;
use crate::meta::Marker;
use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource name for CPU
pub const RESOURCE_CPU: &str = "cpu";

/// Resource name for memory
pub const RESOURCE_MEMORY: &str = "memory";

/// Named resource quantities
pub type ResourceList = BTreeMap<String, Quantity>;

/// The virtual hardware of a workload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DomainSpec {
    /// Compute resources reserved for the workload
    pub resources: ResourceRequirements,

    /// CPU topology and placement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    /// Guest memory configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,

    /// Emulated machine type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<Machine>,

    /// Firmware and boot configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Firmware>,

    /// Guest-visible platform features
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,

    /// Attached devices
    pub devices: Devices,

    /// How IO threads are assigned to disks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_threads_policy: Option<String>,

    /// Confidential computing configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_security: Option<LaunchSecurity>,
}

impl DomainSpec {
    /// Whether CPUs are pinned to dedicated host cores
    pub fn dedicated_cpu_placement(&self) -> bool {
        self.cpu.as_ref().is_some_and(|cpu| cpu.dedicated_cpu_placement)
    }

    /// Configured hugepage size, if any
    pub fn hugepages(&self) -> Option<&Hugepages> {
        self.memory.as_ref().and_then(|m| m.hugepages.as_ref())
    }

    /// Configured bootloader, if any
    pub fn bootloader(&self) -> Option<&Bootloader> {
        self.firmware.as_ref().and_then(|f| f.bootloader.as_ref())
    }

    /// EFI bootloader configuration, if any
    pub fn efi(&self) -> Option<&Efi> {
        self.bootloader().and_then(|b| b.efi.as_ref())
    }
}

/// Resource requests and limits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    /// Minimum resources required
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: ResourceList,

    /// Maximum resources allowed
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: ResourceList,
}

impl ResourceRequirements {
    /// Requested quantity of a resource
    pub fn request(&self, name: &str) -> Option<&Quantity> {
        self.requests.get(name)
    }

    /// Limit of a resource
    pub fn limit(&self, name: &str) -> Option<&Quantity> {
        self.limits.get(name)
    }

    /// Requested memory, zero when absent
    pub fn memory_request(&self) -> Quantity {
        self.request(RESOURCE_MEMORY).cloned().unwrap_or_default()
    }

    /// Memory limit, zero when absent
    pub fn memory_limit(&self) -> Quantity {
        self.limit(RESOURCE_MEMORY).cloned().unwrap_or_default()
    }

    /// Requested CPU, zero when absent
    pub fn cpu_request(&self) -> Quantity {
        self.request(RESOURCE_CPU).cloned().unwrap_or_default()
    }

    /// CPU limit, zero when absent
    pub fn cpu_limit(&self) -> Quantity {
        self.limit(RESOURCE_CPU).cloned().unwrap_or_default()
    }
}

/// CPU topology and placement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cpu {
    /// Cores per socket
    pub cores: u32,

    /// Sockets presented to the guest
    pub sockets: u32,

    /// Threads per core
    pub threads: u32,

    /// Upper bound for socket hotplug
    pub max_sockets: u32,

    /// CPU model exposed to the guest
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,

    /// Pin vCPUs to dedicated host cores
    pub dedicated_cpu_placement: bool,

    /// Run the emulator thread on its own core
    pub isolate_emulator_thread: bool,

    /// NUMA topology
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numa: Option<Numa>,

    /// Realtime tuning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<Realtime>,

    /// Individual CPU feature policies
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<CpuFeature>,
}

impl Cpu {
    /// Total vCPU count implied by the topology
    pub fn vcpus(&self) -> u64 {
        let cores = u64::from(self.cores.max(1));
        let sockets = u64::from(self.sockets.max(1));
        let threads = u64::from(self.threads.max(1));
        cores * sockets * threads
    }

    /// Whether guest NUMA mapping passes through host topology
    pub fn numa_passthrough(&self) -> bool {
        self.numa
            .as_ref()
            .is_some_and(|n| n.guest_mapping_passthrough.is_some())
    }
}

/// NUMA topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Numa {
    /// Mirror the host NUMA layout in the guest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_mapping_passthrough: Option<Marker>,
}

/// Realtime tuning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Realtime {
    /// vCPUs to run with realtime scheduling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

/// A CPU feature and how it is applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuFeature {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub policy: String,
}

/// Guest memory configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Memory {
    /// Hugepage backing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hugepages: Option<Hugepages>,

    /// Memory visible to the guest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<Quantity>,

    /// Upper bound for memory hotplug
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_guest: Option<Quantity>,
}

/// Hugepage backing. The size is kept as text so malformed values can be
/// reported with their locator instead of failing the decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Hugepages {
    pub page_size: String,
}

/// Emulated machine type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Machine {
    #[serde(rename = "type")]
    pub machine_type: String,
}

/// Firmware configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Firmware {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// SMBIOS serial number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<Bootloader>,

    /// Direct kernel boot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_boot: Option<KernelBoot>,
}

/// Bootloader selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bootloader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bios: Option<Bios>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efi: Option<Efi>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Bios {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_serial: Option<bool>,
}

/// EFI bootloader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Efi {
    /// Secure boot, on when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_boot: Option<bool>,

    /// Persist EFI variables across restarts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
}

impl Efi {
    /// Secure boot is enabled unless explicitly turned off
    pub fn secure_boot_enabled(&self) -> bool {
        self.secure_boot.unwrap_or(true)
    }
}

/// Direct kernel boot from a container image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KernelBoot {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kernel_args: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<KernelBootContainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KernelBootContainer {
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kernel_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub initrd_path: String,
}

/// Guest-visible platform features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// System management mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smm: Option<FeatureState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub acpi: Option<FeatureState>,
}

/// On/off toggle for a feature, on when present without a value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl FeatureState {
    /// Whether the feature is on
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Confidential computing configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSecurity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sev: Option<Sev>,
}

/// AMD secure encrypted virtualization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sev {
    /// Remote attestation before the guest starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Marker>,
}
