//! List length limits
//!
//! These rules halt their table: once a list is over its limit, the
//! remaining rules would mostly produce noise for the same entries.

use super::common::{list_exceeds_limit_message, ARRAY_LEN_MAX};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, VirtualMachineInstanceSpec};

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("limits.disks", 100, disks).halting(),
        Rule::new("limits.volumes", 110, volumes).halting(),
        Rule::new("limits.interfaces", 800, interfaces).halting(),
        Rule::new("limits.networks", 810, networks).halting(),
        Rule::new("limits.pod_interfaces", 820, pod_interfaces).halting(),
    ]
}

fn exceeds(field: FieldPath, len: usize) -> Vec<Finding> {
    if len > ARRAY_LEN_MAX {
        vec![Finding::invalid(&field, list_exceeds_limit_message(&field))]
    } else {
        Vec::new()
    }
}

fn disks(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    exceeds(
        field.children(&["domain", "devices", "disks"]),
        spec.domain.devices.disks.len(),
    )
}

fn volumes(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    exceeds(field.child("volumes"), spec.volumes.len())
}

fn interfaces(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    exceeds(
        field.children(&["domain", "devices", "interfaces"]),
        spec.domain.devices.interfaces.len(),
    )
}

fn networks(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    exceeds(field.child("networks"), spec.networks.len())
}

/// Pod networks connected to an interface, each network counted once
pub(crate) fn pod_interface_count(spec: &VirtualMachineInstanceSpec) -> usize {
    spec.networks
        .iter()
        .filter(|net| net.pod.is_some())
        .filter(|net| {
            spec.domain
                .devices
                .interfaces
                .iter()
                .any(|iface| iface.name == net.name)
        })
        .count()
}

fn pod_interfaces(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if pod_interface_count(spec) > 1 {
        let interfaces = field.child("interfaces");
        vec![Finding::duplicate(
            &interfaces,
            format!("more than one interface is connected to a pod network in {interfaces}"),
        )]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virt_types::{Disk, Interface, InterfaceBinding, Network};

    #[test]
    fn test_too_many_disks() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.devices.disks = (0..=ARRAY_LEN_MAX)
            .map(|i| Disk::new(format!("disk{i}"), "virtio"))
            .collect();
        let findings = disks(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "domain.devices.disks list exceeds the 256 element limit in length"
        );
    }

    #[test]
    fn test_two_pod_interfaces() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.networks = vec![Network::pod("a"), Network::pod("b")];
        spec.domain.devices.interfaces = vec![
            Interface::new("a", InterfaceBinding::Masquerade),
            Interface::new("b", InterfaceBinding::Masquerade),
        ];
        assert_eq!(pod_interface_count(&spec), 2);

        let findings = pod_interfaces(&FieldPath::new("spec"), &spec, &ClusterConfig::default());
        assert_eq!(findings[0].field.to_string(), "spec.interfaces");
        assert_eq!(findings[0].kind, crate::finding::FindingKind::Duplicate);
    }
}
