//! Readiness and liveness probes

use super::limits::pod_interface_count;
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, Probe, VirtualMachineInstanceSpec};

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("probes.readiness", 1400, readiness),
        Rule::new("probes.liveness", 1410, liveness),
        Rule::new("probes.pod_network", 1420, pod_network),
    ]
}

fn probe_actions(path: &FieldPath, probe: Option<&Probe>) -> Vec<Finding> {
    let Some(probe) = probe else {
        return Vec::new();
    };
    match probe.action_count() {
        0 => vec![Finding::required(
            path,
            format!(
                "either {}, {} or {} must be set if a {path} is specified",
                path.child("tcpSocket"),
                path.child("exec"),
                path.child("httpGet"),
            ),
        )],
        1 => Vec::new(),
        _ => vec![Finding::invalid(
            path,
            format!("{path} must have exactly one probe type set"),
        )],
    }
}

fn readiness(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    probe_actions(&field.child("readinessProbe"), spec.readiness_probe.as_ref())
}

fn liveness(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    probe_actions(&field.child("livenessProbe"), spec.liveness_probe.as_ref())
}

/// Network probes are answered over the pod network
fn pod_network(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if pod_interface_count(spec) > 0 {
        return Vec::new();
    }

    let mut findings = Vec::new();
    let probes = [
        ("readinessProbe", spec.readiness_probe.as_ref()),
        ("livenessProbe", spec.liveness_probe.as_ref()),
    ];
    for (name, probe) in probes {
        let Some(probe) = probe else { continue };
        let path = field.child(name);
        let actions = [
            ("httpGet", probe.http_get.is_some()),
            ("tcpSocket", probe.tcp_socket.is_some()),
        ];
        for (action, _) in actions.into_iter().filter(|(_, set)| *set) {
            let action_path = path.child(action);
            findings.push(Finding::invalid(
                &action_path,
                format!("{action_path} is only allowed if the Pod Network is attached"),
            ));
        }
    }
    findings
}
