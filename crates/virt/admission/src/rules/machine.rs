//! Emulated machine type and firmware serial

use super::common::{is_serial_charset, MAX_STR_LEN};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, MachinePattern, VirtualMachineInstanceSpec};

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("machine.emulated_machine", 400, emulated_machine),
        Rule::new("machine.firmware_serial", 410, firmware_serial),
    ]
}

/// Machine types are checked against cluster patterns, unanchored
fn emulated_machine(field: &FieldPath, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Vec<Finding> {
    let Some(machine_type) = spec
        .domain
        .machine
        .as_ref()
        .map(|m| m.machine_type.as_str())
        .filter(|t| !t.is_empty())
    else {
        return Vec::new();
    };

    let path = field.children(&["domain", "machine", "type"]);
    let patterns = config.emulated_machines_for(spec.architecture.as_deref());
    if patterns.iter().any(|p| p.is_match(machine_type)) {
        return Vec::new();
    }

    let allowed: Vec<&str> = patterns.iter().map(MachinePattern::as_str).collect();
    vec![Finding::invalid(
        &path,
        format!(
            "{path} is not supported: {machine_type} (allowed values: [{}])",
            allowed.join(" ")
        ),
    )]
}

fn firmware_serial(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(serial) = spec
        .domain
        .firmware
        .as_ref()
        .and_then(|f| f.serial.as_deref())
        .filter(|s| !s.is_empty())
    else {
        return Vec::new();
    };

    let path = field.children(&["domain", "firmware", "serial"]);
    let mut findings = Vec::new();
    if serial.len() > MAX_STR_LEN {
        findings.push(Finding::invalid(
            &path,
            format!("{path} must be less than or equal to {MAX_STR_LEN} in length, if specified"),
        ));
    }
    if !is_serial_charset(serial) {
        findings.push(Finding::invalid(
            &path,
            format!("{path} must be made up of the following characters [A-Za-z0-9_.+-], if specified"),
        ));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use virt_types::domain::Machine;
    use virt_types::Firmware;

    fn with_machine(machine_type: &str, arch: Option<&str>) -> VirtualMachineInstanceSpec {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.machine = Some(Machine {
            machine_type: machine_type.into(),
        });
        spec.architecture = arch.map(str::to_string);
        spec
    }

    #[test]
    fn test_machine_type_matches_default_arch() {
        let config = ClusterConfig::default();
        assert!(emulated_machine(&FieldPath::root(), &with_machine("pc-q35-rhel9", None), &config).is_empty());

        let findings = emulated_machine(&FieldPath::root(), &with_machine("virt", None), &config);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "domain.machine.type is not supported: virt (allowed values: [q35* pc-q35*])"
        );
    }

    #[test]
    fn test_machine_type_uses_spec_arch() {
        let config = ClusterConfig::default();
        let spec = with_machine("virt-8.0", Some("arm64"));
        assert!(emulated_machine(&FieldPath::root(), &spec, &config).is_empty());
    }

    #[test]
    fn test_configured_patterns() {
        let mut config = ClusterConfig::default();
        config
            .emulated_machines
            .insert("amd64".into(), vec![MachinePattern::new("^pc-i440fx").unwrap()]);
        let findings = emulated_machine(&FieldPath::root(), &with_machine("q35", None), &config);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "domain.machine.type is not supported: q35 (allowed values: [^pc-i440fx])"
        );
        assert!(emulated_machine(&FieldPath::root(), &with_machine("pc-i440fx-2.12", None), &config).is_empty());
    }

    #[test]
    fn test_firmware_serial() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.firmware = Some(Firmware {
            serial: Some("bad serial!".into()),
            ..Default::default()
        });
        let findings = firmware_serial(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field.to_string(), "domain.firmware.serial");

        spec.domain.firmware = Some(Firmware {
            serial: Some("a".repeat(MAX_STR_LEN + 1)),
            ..Default::default()
        });
        let findings = firmware_serial(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("must be less than or equal to 256"));
    }
}
