//! Features behind cluster feature gates
//!
//! Each rule here declares its gate and only runs while that gate is
//! disabled, so enabling a gate can only remove findings.

use super::common::{gate_not_enabled, gate_not_enabled_message};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, FeatureGate, VirtualMachineInstanceSpec};

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("gates.host_disk", 1605, host_disk).gated(FeatureGate::HostDisk),
        Rule::new("gates.downward_metrics_volume", 1606, downward_metrics_volume)
            .gated(FeatureGate::DownwardMetrics),
        Rule::new("gates.gpu", 1800, gpus).gated(FeatureGate::Gpu),
        Rule::new("gates.virtiofs", 1810, virtiofs).gated(FeatureGate::ExperimentalVirtiofsSupport),
        Rule::new("gates.host_devices", 1820, host_devices).gated(FeatureGate::HostDevices),
        Rule::new("gates.sev", 1840, sev).gated(FeatureGate::WorkloadEncryptionSev),
        Rule::new("gates.vsock", 1850, vsock).gated(FeatureGate::Vsock),
        Rule::new("gates.persistent_reservation", 1860, persistent_reservation)
            .gated(FeatureGate::PersistentReservation),
        Rule::new("gates.persistent_state", 1870, persistent_state).gated(FeatureGate::VmPersistentState),
        Rule::new("gates.downward_metrics_device", 1880, downward_metrics_device)
            .gated(FeatureGate::DownwardMetrics),
    ]
}

fn host_disk(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let volumes = field.child("volumes");
    spec.volumes
        .iter()
        .enumerate()
        .filter(|(_, v)| v.source.host_disk.is_some())
        .map(|(idx, _)| Finding::invalid(&volumes.index(idx), "HostDisk feature gate is not enabled"))
        .collect()
}

fn downward_metrics_volume(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let volumes = field.child("volumes");
    spec.volumes
        .iter()
        .enumerate()
        .filter(|(_, v)| v.source.downward_metrics.is_some())
        .map(|(idx, _)| {
            Finding::invalid(
                &volumes.index(idx),
                "downwardMetrics disks are not allowed: DownwardMetrics feature gate is not enabled.",
            )
        })
        .collect()
}

fn gpus(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if spec.domain.devices.gpus.is_empty() {
        return Vec::new();
    }
    vec![gate_not_enabled(
        &field.children(&["domain", "devices", "gpus"]),
        FeatureGate::Gpu,
    )]
}

/// Filesystems backed by claims or host disks need a privileged virtiofs
/// container
fn virtiofs(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let privileged = spec.domain.devices.filesystems.iter().any(|fs| {
        spec.volume(&fs.name)
            .is_some_and(|v| v.is_claim_backed() || v.source.host_disk.is_some())
    });
    if !privileged {
        return Vec::new();
    }
    vec![Finding::invalid(
        &field.children(&["domain", "devices", "filesystems"]),
        "virtiofs feature gate is not enabled in kubevirt-config",
    )]
}

fn host_devices(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if spec.domain.devices.host_devices.is_empty() {
        return Vec::new();
    }
    vec![Finding::invalid(
        &field.children(&["domain", "devices", "hostDevices"]),
        "Host Devices feature gate is not enabled in kubevirt-config",
    )]
}

fn sev(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if spec.domain.launch_security.is_none() {
        return Vec::new();
    }
    vec![gate_not_enabled(
        &field.child("launchSecurity"),
        FeatureGate::WorkloadEncryptionSev,
    )]
}

fn vsock(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if spec.domain.devices.autoattach_vsock != Some(true) {
        return Vec::new();
    }
    vec![gate_not_enabled(
        &field.children(&["domain", "devices", "autoattachVSOCK"]),
        FeatureGate::Vsock,
    )]
}

fn persistent_reservation(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let reserved = spec
        .domain
        .devices
        .disks
        .iter()
        .position(|d| d.lun.as_ref().is_some_and(|lun| lun.reservation));
    match reserved {
        Some(idx) => vec![gate_not_enabled(
            &field
                .children(&["domain", "devices", "disks"])
                .index(idx)
                .children(&["lun", "reservation"]),
            FeatureGate::PersistentReservation,
        )],
        None => Vec::new(),
    }
}

/// Persistent TPM and EFI state need backend storage
fn persistent_state(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    let message = gate_not_enabled_message(FeatureGate::VmPersistentState);

    if spec
        .domain
        .devices
        .tpm
        .as_ref()
        .is_some_and(|tpm| tpm.persistent == Some(true))
    {
        findings.push(Finding::invalid(
            &field.children(&["domain", "devices", "tpm", "persistent"]),
            message.clone(),
        ));
    }
    if spec.domain.efi().is_some_and(|efi| efi.persistent == Some(true)) {
        findings.push(Finding::invalid(
            &field.children(&["domain", "firmware", "bootloader", "efi", "persistent"]),
            message,
        ));
    }
    findings
}

fn downward_metrics_device(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if spec.domain.devices.downward_metrics.is_none() {
        return Vec::new();
    }
    vec![Finding::invalid(
        &field.children(&["domain", "devices", "downwardMetrics"]),
        "downwardMetrics virtio serial is not allowed: DownwardMetrics feature gate is not enabled",
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleTable;
    use virt_types::devices::{bus, Gpu, LunTarget, Tpm};
    use virt_types::{Disk, Filesystem, Marker, Volume};

    fn table() -> RuleTable<VirtualMachineInstanceSpec> {
        RuleTable::with_rules("gates", rules()).unwrap()
    }

    #[test]
    fn test_every_rule_declares_a_gate() {
        assert!(rules().iter().all(|r| r.gate.is_some()));
    }

    #[test]
    fn test_gpu_gate() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.devices.gpus = vec![Gpu {
            name: "gpu0".into(),
            device_name: "nvidia.com/TU104GL".into(),
        }];

        let findings = table().evaluate(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, "GPU feature gate is not enabled in kubevirt-config");
        assert_eq!(findings[0].field.to_string(), "domain.devices.gpus");

        let config = ClusterConfig::default().with_gate(FeatureGate::Gpu);
        assert!(table().evaluate(&FieldPath::root(), &spec, &config).is_empty());
    }

    #[test]
    fn test_virtiofs_only_for_privileged_filesystems() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.devices.filesystems = vec![Filesystem {
            name: "shared".into(),
            virtiofs: Some(Marker {}),
        }];
        spec.volumes = vec![Volume::container_disk("shared", "img")];
        assert!(virtiofs(&FieldPath::root(), &spec, &ClusterConfig::default()).is_empty());

        spec.volumes = vec![Volume::pvc("shared", "claim")];
        assert_eq!(virtiofs(&FieldPath::root(), &spec, &ClusterConfig::default()).len(), 1);
    }

    #[test]
    fn test_persistent_reservation_and_state() {
        let mut spec = VirtualMachineInstanceSpec::default();
        let mut lun = Disk::new("lun0", bus::SCSI);
        lun.disk = None;
        lun.lun = Some(LunTarget {
            bus: bus::SCSI.into(),
            reservation: true,
            ..Default::default()
        });
        spec.domain.devices.disks = vec![Disk::new("root", bus::VIRTIO), lun];
        spec.domain.devices.tpm = Some(Tpm {
            persistent: Some(true),
        });

        let findings = table().evaluate(&FieldPath::root(), &spec, &ClusterConfig::default());
        let fields: Vec<_> = findings.iter().map(|f| f.field.to_string()).collect();
        assert_eq!(
            fields,
            [
                "domain.devices.disks[1].lun.reservation",
                "domain.devices.tpm.persistent",
            ]
        );
        assert_eq!(
            findings[1].message,
            "VMPersistentState feature gate is not enabled in kubevirt-config"
        );
    }

    #[test]
    fn test_vsock_and_downward_metrics() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.devices.autoattach_vsock = Some(true);
        spec.domain.devices.downward_metrics = Some(Marker {});

        let findings = table().evaluate(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].message, "VSOCK feature gate is not enabled in kubevirt-config");

        let config = ClusterConfig::default()
            .with_gate(FeatureGate::Vsock)
            .with_gate(FeatureGate::DownwardMetrics);
        assert!(table().evaluate(&FieldPath::root(), &spec, &config).is_empty());
    }
}
