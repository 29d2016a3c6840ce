//! Virtual machine spec rules
//!
//! These cover the parts of a virtual machine outside its instance template.
//! The template itself is checked by the instance rules, rooted at
//! `spec.template`.

use super::common::gate_not_enabled;
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::vm::{DataVolumeTemplate, RunStrategy, UPDATE_VOLUMES_STRATEGY_MIGRATION};
use virt_types::{ClusterConfig, FeatureGate, VirtualMachineInstanceSpec, VirtualMachineSpec};

/// Memory hotplug granularity
const HOTPLUG_BLOCK_ALIGNMENT: i128 = 2 * 1024 * 1024;

/// Memory hotplug granularity with 1Gi hugepages
const HOTPLUG_1G_HUGEPAGES_ALIGNMENT: i128 = 1024 * 1024 * 1024;

const HOTPLUG_ARCHITECTURES: &[&str] = &["amd64", "arm64"];

pub fn rules() -> Vec<Rule<VirtualMachineSpec>> {
    vec![
        Rule::new("vm.template", 100, template).halting(),
        Rule::new("vm.data_volume_templates", 200, data_volume_templates),
        Rule::new("vm.run_strategy", 300, run_strategy),
        Rule::new("vm.wait_as_receiver", 310, wait_as_receiver).gated(FeatureGate::DecentralizedLiveMigration),
        Rule::new("vm.live_update_cpu", 400, live_update_cpu),
        Rule::new("vm.live_update_memory", 410, live_update_memory),
        Rule::new("vm.update_volumes_strategy", 420, update_volumes_strategy),
    ]
}

fn template_spec(spec: &VirtualMachineSpec) -> Option<&VirtualMachineInstanceSpec> {
    spec.template.as_ref().map(|t| &t.spec)
}

fn template(field: &FieldPath, spec: &VirtualMachineSpec, _: &ClusterConfig) -> Vec<Finding> {
    if spec.template.is_some() {
        return Vec::new();
    }
    vec![Finding::required(
        &field.child("template"),
        "missing virtual machine template.",
    )]
}

fn data_volume_templates(field: &FieldPath, spec: &VirtualMachineSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(template) = template_spec(spec) else {
        return Vec::new();
    };
    let templates = field.child("dataVolumeTemplates");
    let mut findings = Vec::new();

    for (idx, dv) in spec.data_volume_templates.iter().enumerate() {
        let path = templates.index(idx);
        if let Some(finding) = data_volume(&path, dv) {
            findings.push(finding);
            continue;
        }

        let name = &dv.metadata.name;
        let referenced = template.volumes.iter().any(|v| {
            v.source
                .persistent_volume_claim
                .as_ref()
                .is_some_and(|pvc| &pvc.claim_name == name)
                || v.source.data_volume.as_ref().is_some_and(|d| &d.name == name)
        });
        if !referenced {
            findings.push(Finding::required(
                &path,
                format!("DataVolumeTemplate entry {path} must be referenced in the VMI template's 'volumes' list"),
            ));
        }
    }
    findings
}

/// First problem with one data volume template
fn data_volume(path: &FieldPath, dv: &DataVolumeTemplate) -> Option<Finding> {
    if dv.metadata.name.is_empty() {
        let name = path.children(&["metadata", "name"]);
        return Some(Finding::required(
            &name,
            format!("'name' field must not be empty for DataVolumeTemplate entry {name}."),
        ));
    }

    let spec_path = path.child("spec");
    let spec = &dv.spec;
    match (&spec.pvc, &spec.storage) {
        (None, None) => {
            return Some(Finding::invalid(&spec_path, "Missing Data volume PVC or Storage"));
        }
        (Some(_), Some(_)) => {
            return Some(Finding::invalid(
                &spec_path,
                "Duplicate storage definition, both target storage and target pvc defined",
            ));
        }
        _ => {}
    }

    let has_source = spec.source.is_some() || spec.source_ref.is_some();
    if spec.externally_populated() {
        if has_source {
            return Some(Finding::invalid(
                &spec_path.child("source"),
                "External population is incompatible with Source and SourceRef",
            ));
        }
        return None;
    }
    if !has_source {
        return Some(Finding::invalid(
            &spec_path.child("source"),
            "Data volume should have either Source, SourceRef, or be externally populated",
        ));
    }

    if spec.source.is_some() {
        match spec.source_count() {
            0 => return Some(Finding::invalid(&spec_path.child("source"), "Missing dataVolume valid source")),
            1 => {}
            _ => return Some(Finding::invalid(&spec_path.child("source"), "Multiple dataVolume sources")),
        }
    }
    None
}

fn run_strategy(field: &FieldPath, spec: &VirtualMachineSpec, _: &ClusterConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    match (&spec.running, &spec.run_strategy) {
        (Some(_), Some(_)) => findings.push(Finding::invalid(
            &field.child("running"),
            "Running and RunStrategy are mutually exclusive. Note that Running is deprecated, please use RunStrategy instead",
        )),
        (None, None) => findings.push(Finding::invalid(
            &field.child("running"),
            "RunStrategy must be specified",
        )),
        _ => {}
    }

    if let Some(strategy) = &spec.run_strategy {
        if RunStrategy::parse(strategy).is_none() {
            findings.push(Finding::invalid(
                &field.child("runStrategy"),
                format!("Invalid RunStrategy ({strategy})"),
            ));
        }
    }
    findings
}

/// Waiting for an incoming migration is part of decentralized migration
fn wait_as_receiver(field: &FieldPath, spec: &VirtualMachineSpec, _: &ClusterConfig) -> Vec<Finding> {
    let waits = spec
        .run_strategy
        .as_deref()
        .and_then(RunStrategy::parse)
        .is_some_and(|s| s == RunStrategy::WaitAsReceiver);
    if !waits {
        return Vec::new();
    }
    vec![gate_not_enabled(
        &field.child("runStrategy"),
        FeatureGate::DecentralizedLiveMigration,
    )]
}

fn live_update_cpu(field: &FieldPath, spec: &VirtualMachineSpec, config: &ClusterConfig) -> Vec<Finding> {
    if !config.live_update {
        return Vec::new();
    }
    match template_spec(spec).and_then(|t| t.domain.cpu.as_ref()) {
        Some(cpu) if cpu.sockets != 0 && cpu.max_sockets != 0 && cpu.sockets > cpu.max_sockets => {
            vec![Finding::invalid(
                &field.children(&["template", "spec", "domain", "cpu", "sockets"]),
                "Number of sockets in CPU topology is greater than the maximum sockets allowed",
            )]
        }
        _ => Vec::new(),
    }
}

fn live_update_memory(field: &FieldPath, spec: &VirtualMachineSpec, config: &ClusterConfig) -> Vec<Finding> {
    if !config.live_update {
        return Vec::new();
    }
    let Some(template) = template_spec(spec) else {
        return Vec::new();
    };
    let has_max_guest = template
        .domain
        .memory
        .as_ref()
        .is_some_and(|m| m.max_guest.is_some());
    if !has_max_guest {
        return Vec::new();
    }

    match memory_hotplug_problem(template, config) {
        Some(message) => vec![Finding::invalid(
            &field.children(&["template", "spec", "domain", "memory", "guest"]),
            message,
        )],
        None => Vec::new(),
    }
}

/// First reason the template cannot hotplug memory
fn memory_hotplug_problem(spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Option<String> {
    let domain = &spec.domain;
    let memory = domain.memory.as_ref()?;
    let max_guest = memory.max_guest.as_ref()?;

    let cpu = domain.cpu.as_ref();
    if cpu.is_some_and(|c| c.realtime.is_some()) {
        return Some("Memory hotplug is not compatible with realtime VMs".to_string());
    }
    if domain.launch_security.is_some() {
        return Some("Memory hotplug is not compatible with encrypted VMs".to_string());
    }
    if cpu.is_some_and(|c| c.numa_passthrough()) {
        return Some("Memory hotplug is not compatible with guest mapping passthrough".to_string());
    }
    let architecture = spec
        .architecture
        .as_deref()
        .unwrap_or(config.default_architecture.as_str());
    if !architecture.is_empty() && !HOTPLUG_ARCHITECTURES.contains(&architecture) {
        return Some("Memory hotplug is only available for x86_64 and arm64 VMs".to_string());
    }

    let Some(guest) = memory.guest.as_ref() else {
        return Some("Guest memory must be configured when memory hotplug is enabled".to_string());
    };
    if guest.value() > max_guest.value() {
        return Some("Guest memory is greater than the configured maxGuest memory".to_string());
    }

    if max_guest.value() % HOTPLUG_BLOCK_ALIGNMENT != 0 {
        return Some("MaxGuest must be 2Mi aligned".to_string());
    }
    let one_gi_pages = memory
        .hugepages
        .as_ref()
        .is_some_and(|h| h.page_size == "1Gi");
    let (alignment, label) = if one_gi_pages {
        (HOTPLUG_1G_HUGEPAGES_ALIGNMENT, "1Gi")
    } else {
        (HOTPLUG_BLOCK_ALIGNMENT, "2Mi")
    };
    if guest.value() % alignment != 0 {
        return Some(format!("Guest memory must be {label} aligned"));
    }
    None
}

fn update_volumes_strategy(field: &FieldPath, spec: &VirtualMachineSpec, config: &ClusterConfig) -> Vec<Finding> {
    if !config.live_update {
        return Vec::new();
    }
    let Some(strategy) = &spec.update_volumes_strategy else {
        return Vec::new();
    };

    let path = field.child("updateVolumesStrategy");
    let mut findings = Vec::new();
    if !config.is_enabled(FeatureGate::VolumesUpdateStrategy) {
        findings.push(gate_not_enabled(&path, FeatureGate::VolumesUpdateStrategy));
    }
    if strategy == UPDATE_VOLUMES_STRATEGY_MIGRATION && !config.is_enabled(FeatureGate::VolumeMigration) {
        findings.push(gate_not_enabled(&path, FeatureGate::VolumeMigration));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::FindingKind;
    use crate::rules::RuleTable;
    use virt_types::domain::Cpu;
    use virt_types::vm::{DataVolumeSpec, VirtualMachineInstanceTemplate};
    use virt_types::{Memory, ObjectMeta, Quantity, Volume};

    fn table() -> RuleTable<VirtualMachineSpec> {
        RuleTable::with_rules("vm_spec", rules()).unwrap()
    }

    fn check(spec: &VirtualMachineSpec, config: &ClusterConfig) -> Vec<Finding> {
        table().evaluate(&FieldPath::new("spec"), spec, config)
    }

    fn vm_spec() -> VirtualMachineSpec {
        VirtualMachineSpec {
            run_strategy: Some("Always".into()),
            template: Some(VirtualMachineInstanceTemplate::default()),
            ..Default::default()
        }
    }

    fn dv_template(name: &str) -> DataVolumeTemplate {
        DataVolumeTemplate {
            metadata: ObjectMeta::new(name, ""),
            spec: DataVolumeSpec {
                pvc: Some(serde_json::json!({"accessModes": ["ReadWriteOnce"]})),
                source: Some(
                    [("http".to_string(), serde_json::json!({"url": "http://img"}))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_valid_vm_spec() {
        assert!(check(&vm_spec(), &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_missing_template_halts() {
        let spec = VirtualMachineSpec::default();
        let findings = check(&spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Required);
        assert_eq!(findings[0].field.to_string(), "spec.template");
    }

    #[test]
    fn test_run_strategy_rules() {
        let config = ClusterConfig::default();
        let mut spec = vm_spec();
        spec.running = Some(true);
        assert_eq!(
            check(&spec, &config)[0].message,
            "Running and RunStrategy are mutually exclusive. Note that Running is deprecated, please use RunStrategy instead"
        );

        spec.running = None;
        spec.run_strategy = None;
        assert_eq!(check(&spec, &config)[0].message, "RunStrategy must be specified");

        spec.run_strategy = Some("Sometimes".into());
        let findings = check(&spec, &config);
        assert_eq!(findings[0].field.to_string(), "spec.runStrategy");
        assert_eq!(findings[0].message, "Invalid RunStrategy (Sometimes)");
    }

    #[test]
    fn test_wait_as_receiver_needs_gate() {
        let mut spec = vm_spec();
        spec.run_strategy = Some("WaitAsReceiver".into());
        let findings = check(&spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "DecentralizedLiveMigration feature gate is not enabled in kubevirt-config"
        );

        let config = ClusterConfig::default().with_gate(FeatureGate::DecentralizedLiveMigration);
        assert!(check(&spec, &config).is_empty());
    }

    #[test]
    fn test_data_volume_template_must_be_referenced() {
        let mut spec = vm_spec();
        spec.data_volume_templates = vec![dv_template("rootdisk")];
        let findings = check(&spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "DataVolumeTemplate entry spec.dataVolumeTemplates[0] must be referenced in the VMI template's 'volumes' list"
        );

        if let Some(t) = spec.template.as_mut() {
            t.spec.volumes = vec![Volume::data_volume("root", "rootdisk")];
        }
        assert!(check(&spec, &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_data_volume_template_storage_and_sources() {
        let config = ClusterConfig::default();
        let mut spec = vm_spec();

        let mut both = dv_template("a");
        both.spec.storage = Some(serde_json::json!({}));
        let mut none = dv_template("b");
        none.spec.pvc = None;
        let mut sourceless = dv_template("c");
        sourceless.spec.source = None;
        let mut unnamed = dv_template("");
        unnamed.spec = DataVolumeSpec::default();
        spec.data_volume_templates = vec![both, none, sourceless, unnamed];

        let messages: Vec<_> = check(&spec, &config).into_iter().map(|f| f.message).collect();
        assert_eq!(
            messages,
            [
                "Duplicate storage definition, both target storage and target pvc defined",
                "Missing Data volume PVC or Storage",
                "Data volume should have either Source, SourceRef, or be externally populated",
                "'name' field must not be empty for DataVolumeTemplate entry spec.dataVolumeTemplates[3].metadata.name.",
            ]
        );
    }

    #[test]
    fn test_externally_populated_template_rejects_sources() {
        let mut dv = dv_template("populated");
        dv.spec.pvc = Some(serde_json::json!({"dataSourceRef": {"name": "src"}}));
        let finding = data_volume(&FieldPath::root(), &dv);
        assert_eq!(
            finding.map(|f| f.message),
            Some("External population is incompatible with Source and SourceRef".to_string())
        );

        dv.spec.source = None;
        assert!(data_volume(&FieldPath::root(), &dv).is_none());
    }

    #[test]
    fn test_live_update_rules_need_live_update() {
        let mut spec = vm_spec();
        if let Some(t) = spec.template.as_mut() {
            t.spec.domain.cpu = Some(Cpu {
                sockets: 8,
                max_sockets: 4,
                ..Default::default()
            });
        }
        spec.update_volumes_strategy = Some(UPDATE_VOLUMES_STRATEGY_MIGRATION.into());

        let off = ClusterConfig::default();
        assert!(live_update_cpu(&FieldPath::new("spec"), &spec, &off).is_empty());
        assert!(update_volumes_strategy(&FieldPath::new("spec"), &spec, &off).is_empty());

        let on = ClusterConfig::default().with_live_update(true);
        let cpu = live_update_cpu(&FieldPath::new("spec"), &spec, &on);
        assert_eq!(cpu[0].field.to_string(), "spec.template.spec.domain.cpu.sockets");

        let volumes = update_volumes_strategy(&FieldPath::new("spec"), &spec, &on);
        let messages: Vec<_> = volumes.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "VolumesUpdateStrategy feature gate is not enabled in kubevirt-config",
                "VolumeMigration feature gate is not enabled in kubevirt-config",
            ]
        );
    }

    #[test]
    fn test_memory_hotplug_limits() {
        let on = ClusterConfig::default().with_live_update(true);
        let mut spec = vm_spec();
        let memory = |guest: &str, max: &str| Memory {
            guest: Some(Quantity::parse(guest).unwrap()),
            max_guest: Some(Quantity::parse(max).unwrap()),
            ..Default::default()
        };

        if let Some(t) = spec.template.as_mut() {
            t.spec.architecture = Some("amd64".into());
            t.spec.domain.memory = Some(memory("1Gi", "4Gi"));
        }
        assert!(live_update_memory(&FieldPath::new("spec"), &spec, &on).is_empty());

        if let Some(t) = spec.template.as_mut() {
            t.spec.domain.memory = Some(memory("5Gi", "4Gi"));
        }
        let findings = live_update_memory(&FieldPath::new("spec"), &spec, &on);
        assert_eq!(findings[0].field.to_string(), "spec.template.spec.domain.memory.guest");
        assert_eq!(
            findings[0].message,
            "Guest memory is greater than the configured maxGuest memory"
        );

        if let Some(t) = spec.template.as_mut() {
            t.spec.domain.memory = Some(memory("1Gi", "2049Mi"));
        }
        assert_eq!(
            live_update_memory(&FieldPath::new("spec"), &spec, &on)[0].message,
            "MaxGuest must be 2Mi aligned"
        );

        if let Some(t) = spec.template.as_mut() {
            t.spec.domain.memory = Some(memory("1025Mi", "4Gi"));
        }
        assert_eq!(
            live_update_memory(&FieldPath::new("spec"), &spec, &on)[0].message,
            "Guest memory must be 2Mi aligned"
        );
    }
}
