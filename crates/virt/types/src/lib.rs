//! Virt Types - workload objects for admission validation
//!
//! Data model for virtual-machine workloads as they arrive at the admission
//! layer: instances, virtual machines, migrations, evictions, and the
//! cluster configuration snapshot used to judge them.
//!
//! ## Key Concepts
//!
//! - **VirtualMachineInstance**: A single running guest and its spec
//! - **VirtualMachine**: A template plus run strategy that owns instances
//! - **Quantity**: Exact fixed-point resource quantities (`200m`, `64Mi`)
//! - **ClusterConfig**: Feature gates and cluster policy, read-only per request
//!
//! Optional sub-structures are `Option<T>`; collections default to empty so
//! partially filled objects decode without ceremony.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cluster;
pub mod devices;
pub mod domain;
pub mod error;
pub mod meta;
pub mod migration;
pub mod network;
pub mod probe;
pub mod quantity;
pub mod vm;
pub mod vmi;
pub mod volume;

// Re-export main types
pub use cluster::{ClusterConfig, FeatureGate, MachinePattern};
pub use devices::{
    Devices, Disk, Filesystem, Input, Interface, InterfaceBinding, Port, SoundDevice,
};
pub use domain::{Cpu, DomainSpec, Firmware, Memory, ResourceRequirements};
pub use error::{DecodeError, DecodeResult, QuantityError};
pub use meta::{Marker, ObjectMeta};
pub use migration::{Eviction, MigrationSpec, VirtualMachineInstanceMigration};
pub use network::Network;
pub use probe::Probe;
pub use quantity::Quantity;
pub use vm::{RunStrategy, VirtualMachine, VirtualMachineSpec, VolumeRequest};
pub use vmi::{VirtualMachineInstance, VirtualMachineInstanceSpec, VirtualMachineInstanceStatus};
pub use volume::{AccessCredential, Volume, VolumeSource};

/// Decode a workload object from raw JSON bytes
pub fn decode<T: serde::de::DeserializeOwned>(kind: &'static str, raw: &[u8]) -> DecodeResult<T> {
    if raw.is_empty() {
        return Err(DecodeError::Empty { kind });
    }
    serde_json::from_slice(raw).map_err(|source| DecodeError::Json { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reports_kind() {
        let err = decode::<VirtualMachineInstance>("VirtualMachineInstance", b"").unwrap_err();
        assert_eq!(err.to_string(), "empty VirtualMachineInstance payload");

        let err = decode::<VirtualMachineInstance>("VirtualMachineInstance", b"{").unwrap_err();
        assert!(err.to_string().starts_with("could not decode VirtualMachineInstance"));
    }

    #[test]
    fn test_decode_instance() {
        let raw = br#"{"metadata":{"name":"vmi","namespace":"default"},
            "spec":{"domain":{"devices":{"disks":[{"name":"a","disk":{"bus":"virtio"}}]}}}}"#;
        let vmi: VirtualMachineInstance = decode("VirtualMachineInstance", raw).unwrap();
        assert_eq!(vmi.metadata.name, "vmi");
        assert_eq!(vmi.spec.domain.devices.disks[0].bus(), "virtio");
    }
}
