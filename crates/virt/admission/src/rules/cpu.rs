//! CPU topology, dedicated placement, NUMA and realtime

use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, Cpu, FeatureGate, VirtualMachineInstanceSpec};

/// Accepted CPU feature policies; empty means the default
const CPU_FEATURE_POLICIES: &[&str] = &["", "force", "require", "optional", "disable", "forbid"];

const ARCH_ARM64: &str = "arm64";

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("cpu.dedicated_placement", 600, dedicated_placement),
        Rule::new("cpu.numa_gate", 610, numa_gate).gated(FeatureGate::Numa),
        Rule::new("cpu.numa_passthrough", 611, numa_passthrough),
        Rule::new("cpu.isolate_emulator_thread", 620, isolate_emulator_thread),
        Rule::new("cpu.feature_policies", 630, feature_policies),
        Rule::new("cpu.max_sockets", 640, max_sockets),
        Rule::new("cpu.realtime", 710, realtime),
    ]
}

/// vCPUs from the explicit topology; unset members are skipped, all unset is 0
fn topology_vcpus(cpu: &Cpu) -> i128 {
    [cpu.cores, cpu.sockets, cpu.threads]
        .into_iter()
        .filter(|n| *n != 0)
        .map(i128::from)
        .reduce(|acc, n| acc * n)
        .unwrap_or(0)
}

fn dedicated_placement(field: &FieldPath, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Vec<Finding> {
    let Some(cpu) = spec.domain.cpu.as_ref().filter(|c| c.dedicated_cpu_placement) else {
        return Vec::new();
    };

    let resources = &spec.domain.resources;
    let mem_req = resources.memory_request().value();
    let mem_lim = resources.memory_limit().value();
    let cpu_req_q = resources.cpu_request();
    let cpu_lim_q = resources.cpu_limit();
    let cpu_req = cpu_req_q.value();
    let cpu_lim = cpu_lim_q.value();
    let vcpus = topology_vcpus(cpu);

    let req_mem_path = field.children(&["domain", "resources", "requests", "memory"]);
    let lim_mem_path = field.children(&["domain", "resources", "limits", "memory"]);
    let req_cpu_path = field.children(&["domain", "resources", "requests", "cpu"]);
    let lim_cpu_path = field.children(&["domain", "resources", "limits", "cpu"]);
    let placement_path = field.children(&["domain", "cpu", "dedicatedCpuPlacement"]);
    let cores_path = field.children(&["domain", "cpu", "cores"]);
    let threads_path = field.children(&["domain", "cpu", "threads"]);

    let mut findings = Vec::new();

    if mem_lim == 0 && mem_req == 0 {
        findings.push(Finding::invalid(
            &lim_mem_path,
            format!("{req_mem_path} or {lim_mem_path} should be provided"),
        ));
    }
    if cpu_req > 0 && !cpu_req_q.is_integer() {
        findings.push(Finding::invalid(
            &req_cpu_path,
            "provided resources CPU requests must be an interger",
        ));
    }
    if cpu_lim > 0 && !cpu_lim_q.is_integer() {
        findings.push(Finding::invalid(
            &lim_cpu_path,
            "provided resources CPU limits must be an interger",
        ));
    }
    if mem_req > 0 && mem_lim > 0 && mem_req != mem_lim {
        findings.push(Finding::invalid(
            &req_mem_path,
            format!("{req_mem_path} must be equal to {lim_mem_path}"),
        ));
    }
    if cpu_req == 0 && cpu_lim == 0 && vcpus == 0 {
        findings.push(Finding::invalid(
            &placement_path,
            format!(
                "either {req_cpu_path} or {lim_cpu_path} or {cores_path} must be provided when DedicatedCPUPlacement is true "
            ),
        ));
    }
    if cpu_req > 0 && cpu_lim > 0 && cpu_req != cpu_lim {
        findings.push(Finding::invalid(
            &placement_path,
            format!("{req_cpu_path} or {lim_cpu_path} must be equal when DedicatedCPUPlacement is true "),
        ));
    }
    if (cpu_req > 0 || cpu_lim > 0) && vcpus > 0 && cpu_req != vcpus && cpu_lim != vcpus {
        findings.push(Finding::invalid(
            &placement_path,
            format!(
                "{req_cpu_path} or {lim_cpu_path} must not be provided at the same time with {cores_path} when DedicatedCPUPlacement is true "
            ),
        ));
    }

    let arch = spec
        .architecture
        .as_deref()
        .filter(|a| !a.is_empty())
        .unwrap_or(config.default_architecture.as_str());
    if cpu.threads > 1 && arch == ARCH_ARM64 {
        let arch_path = field.child("architecture");
        findings.push(Finding::invalid(
            &arch_path,
            format!(
                "threads must not be greater than 1 at {threads_path} (got {}) when {arch_path} is arm64",
                cpu.threads
            ),
        ));
    }
    if cpu.threads > 2 {
        findings.push(Finding::invalid(
            &placement_path,
            format!(
                "Not more than two threads must be provided at {threads_path} (got {}) when DedicatedCPUPlacement is true",
                cpu.threads
            ),
        ));
    }
    findings
}

fn passthrough_path(field: &FieldPath) -> FieldPath {
    field.children(&["domain", "cpu", "numa", "guestMappingPassthrough"])
}

fn numa_gate(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if !spec.domain.cpu.as_ref().is_some_and(Cpu::numa_passthrough) {
        return Vec::new();
    }
    let path = passthrough_path(field);
    vec![Finding::invalid(
        &path,
        format!("NUMA feature gate is not enabled in kubevirt-config, invalid entry {path}"),
    )]
}

fn numa_passthrough(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(cpu) = spec.domain.cpu.as_ref().filter(|c| c.numa_passthrough()) else {
        return Vec::new();
    };
    let path = passthrough_path(field);
    let mut findings = Vec::new();

    if !cpu.dedicated_cpu_placement {
        let placement = field.children(&["domain", "cpu", "dedicatedCpuPlacement"]);
        findings.push(Finding::invalid(
            &path,
            format!("{placement} must be set to true when NUMA topology strategy is set in {path}"),
        ));
    }
    if spec.domain.hugepages().is_none() {
        let hugepages = field.children(&["domain", "memory", "hugepages"]);
        findings.push(Finding::invalid(
            &path,
            format!("{hugepages} must be requested when NUMA topology strategy is set in {path}"),
        ));
    }
    findings
}

fn isolate_emulator_thread(
    field: &FieldPath,
    spec: &VirtualMachineInstanceSpec,
    _: &ClusterConfig,
) -> Vec<Finding> {
    match &spec.domain.cpu {
        Some(cpu) if cpu.isolate_emulator_thread && !cpu.dedicated_cpu_placement => {
            vec![Finding::invalid(
                &field.children(&["domain", "cpu", "isolateEmulatorThread"]),
                "IsolateEmulatorThread should be only set in combination with DedicatedCPUPlacement",
            )]
        }
        _ => Vec::new(),
    }
}

fn feature_policies(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(cpu) = &spec.domain.cpu else {
        return Vec::new();
    };
    let features = field.children(&["domain", "cpu", "features"]);
    cpu.features
        .iter()
        .enumerate()
        .filter(|(_, feature)| !CPU_FEATURE_POLICIES.contains(&feature.policy.as_str()))
        .map(|(idx, feature)| {
            Finding::not_supported(
                &features.index(idx).child("policy"),
                format!(
                    "CPU feature {} uses policy {} that is not supported.",
                    feature.name, feature.policy
                ),
            )
        })
        .collect()
}

fn max_sockets(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    match &spec.domain.cpu {
        Some(cpu) if cpu.max_sockets != 0 && cpu.sockets > cpu.max_sockets => vec![Finding::invalid(
            &field.children(&["domain", "cpu", "sockets"]),
            "Number of sockets in CPU topology is greater than the maximum sockets allowed",
        )],
        _ => Vec::new(),
    }
}

fn realtime(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(cpu) = spec.domain.cpu.as_ref().filter(|c| c.realtime.is_some()) else {
        return Vec::new();
    };
    let realtime_path = field.children(&["domain", "cpu", "realtime"]);
    let mut findings = Vec::new();

    if !cpu.dedicated_cpu_placement {
        let placement = field.children(&["domain", "cpu", "dedicatedCpuPlacement"]);
        findings.push(Finding::required(
            &placement,
            format!("{placement} must be set to true when {realtime_path} is used"),
        ));
    }
    if !cpu.numa_passthrough() {
        let path = passthrough_path(field);
        findings.push(Finding::required(
            &path,
            format!("{path} must be defined when {realtime_path} is used"),
        ));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use virt_types::domain::{CpuFeature, Hugepages, Numa, Realtime, RESOURCE_CPU, RESOURCE_MEMORY};
    use virt_types::{Marker, Memory, Quantity};

    fn dedicated(cpu: Cpu, requests: &[(&str, &str)], limits: &[(&str, &str)]) -> VirtualMachineInstanceSpec {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            dedicated_cpu_placement: true,
            ..cpu
        });
        for (name, value) in requests {
            spec.domain
                .resources
                .requests
                .insert((*name).into(), Quantity::parse(value).unwrap());
        }
        for (name, value) in limits {
            spec.domain
                .resources
                .limits
                .insert((*name).into(), Quantity::parse(value).unwrap());
        }
        spec
    }

    fn messages(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.message.as_str()).collect()
    }

    #[test]
    fn test_topology_vcpus() {
        assert_eq!(topology_vcpus(&Cpu::default()), 0);
        let cpu = Cpu {
            sockets: 2,
            threads: 2,
            ..Default::default()
        };
        assert_eq!(topology_vcpus(&cpu), 4);
    }

    #[test]
    fn test_dedicated_placement_valid() {
        let spec = dedicated(
            Cpu {
                cores: 2,
                ..Default::default()
            },
            &[(RESOURCE_MEMORY, "64Mi"), (RESOURCE_CPU, "2")],
            &[(RESOURCE_MEMORY, "64Mi"), (RESOURCE_CPU, "2")],
        );
        assert!(dedicated_placement(&FieldPath::root(), &spec, &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_dedicated_placement_without_memory_or_cpu() {
        let spec = dedicated(Cpu::default(), &[], &[]);
        let findings = dedicated_placement(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(
            messages(&findings),
            [
                "domain.resources.requests.memory or domain.resources.limits.memory should be provided",
                "either domain.resources.requests.cpu or domain.resources.limits.cpu or domain.cpu.cores must be provided when DedicatedCPUPlacement is true ",
            ]
        );
        assert_eq!(findings[0].field.to_string(), "domain.resources.limits.memory");
    }

    #[test]
    fn test_dedicated_placement_fractional_cpu() {
        let spec = dedicated(
            Cpu::default(),
            &[(RESOURCE_MEMORY, "64Mi"), (RESOURCE_CPU, "1500m")],
            &[],
        );
        let findings = dedicated_placement(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(
            messages(&findings),
            ["provided resources CPU requests must be an interger"]
        );
    }

    #[test]
    fn test_dedicated_placement_cores_conflict() {
        let spec = dedicated(
            Cpu {
                cores: 4,
                ..Default::default()
            },
            &[(RESOURCE_MEMORY, "64Mi"), (RESOURCE_CPU, "2")],
            &[],
        );
        let findings = dedicated_placement(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("must not be provided at the same time with domain.cpu.cores"));
    }

    #[test]
    fn test_dedicated_placement_threads() {
        let spec = dedicated(
            Cpu {
                threads: 3,
                ..Default::default()
            },
            &[(RESOURCE_MEMORY, "64Mi")],
            &[],
        );
        let mut config = ClusterConfig::default();
        config.default_architecture = "arm64".into();
        let findings = dedicated_placement(&FieldPath::root(), &spec, &config);
        let fields: Vec<_> = findings.iter().map(|f| f.field.to_string()).collect();
        assert_eq!(fields, ["architecture", "domain.cpu.dedicatedCpuPlacement"]);
    }

    #[test]
    fn test_numa_requirements() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            numa: Some(Numa {
                guest_mapping_passthrough: Some(Marker {}),
            }),
            ..Default::default()
        });
        let config = ClusterConfig::default();
        assert_eq!(numa_gate(&FieldPath::root(), &spec, &config).len(), 1);
        assert_eq!(numa_passthrough(&FieldPath::root(), &spec, &config).len(), 2);

        spec.domain.cpu.as_mut().unwrap().dedicated_cpu_placement = true;
        spec.domain.memory = Some(Memory {
            hugepages: Some(Hugepages {
                page_size: "2Mi".into(),
            }),
            ..Default::default()
        });
        assert!(numa_passthrough(&FieldPath::root(), &spec, &config).is_empty());
    }

    #[test]
    fn test_feature_policy_not_supported() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            features: vec![
                CpuFeature {
                    name: "pcid".into(),
                    policy: "require".into(),
                },
                CpuFeature {
                    name: "vmx".into(),
                    policy: "sometimes".into(),
                },
            ],
            ..Default::default()
        });
        let findings = feature_policies(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field.to_string(), "domain.cpu.features[1].policy");
        assert_eq!(
            findings[0].message,
            "CPU feature vmx uses policy sometimes that is not supported."
        );
    }

    #[test]
    fn test_sockets_above_max() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            sockets: 8,
            max_sockets: 4,
            ..Default::default()
        });
        let findings = max_sockets(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings[0].field.to_string(), "domain.cpu.sockets");
    }

    #[test]
    fn test_realtime_needs_placement_and_numa() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            realtime: Some(Realtime::default()),
            ..Default::default()
        });
        let findings = realtime(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 2);
        assert!(findings
            .iter()
            .all(|f| f.kind == crate::finding::FindingKind::Required));
    }

    #[test]
    fn test_isolate_emulator_thread() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            isolate_emulator_thread: true,
            ..Default::default()
        });
        assert_eq!(
            isolate_emulator_thread(&FieldPath::root(), &spec, &ClusterConfig::default()).len(),
            1
        );
    }
}
