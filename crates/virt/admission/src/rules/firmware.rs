//! Bootloader, kernel boot, SecureBoot and SEV launch security

use super::common::validate_path;
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, FeatureGate, VirtualMachineInstanceSpec};

const START_STRATEGY_PAUSED: &str = "Paused";

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("firmware.bootloader", 1510, bootloader),
        Rule::new("firmware.kernel_boot", 1520, kernel_boot),
        Rule::new("firmware.secure_boot_smm", 1530, secure_boot_smm),
        Rule::new("firmware.sev", 1841, sev),
    ]
}

fn bootloader(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    match spec.domain.bootloader() {
        Some(loader) if loader.efi.is_some() && loader.bios.is_some() => {
            let path = field.children(&["domain", "firmware", "bootloader"]);
            vec![Finding::invalid(
                &path,
                format!("{path} has both EFI and BIOS configured, but they are mutually exclusive."),
            )]
        }
        _ => Vec::new(),
    }
}

fn kernel_boot(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(kernel_boot) = spec
        .domain
        .firmware
        .as_ref()
        .and_then(|f| f.kernel_boot.as_ref())
    else {
        return Vec::new();
    };
    let path = field.children(&["domain", "firmware", "kernelBoot"]);

    let Some(container) = &kernel_boot.container else {
        if kernel_boot.kernel_args.is_empty() {
            return Vec::new();
        }
        return vec![Finding::invalid(
            &path.child("kernelArgs"),
            "kernel arguments cannot be provided without an external kernel",
        )];
    };

    let container_path = path.child("container");
    let mut findings = Vec::new();
    if container.image.is_empty() {
        findings.push(Finding::required(
            &container_path.child("image"),
            format!("{container_path} must be defined with an image"),
        ));
    }
    if container.kernel_path.is_empty() && container.initrd_path.is_empty() {
        findings.push(Finding::required(
            &container_path,
            format!("{container_path} must be defined with at least one of the following: kernelPath, initrdPath"),
        ));
    }
    if !container.kernel_path.is_empty() {
        findings.extend(validate_path(&container_path.child("kernelPath"), &container.kernel_path));
    }
    if !container.initrd_path.is_empty() {
        findings.extend(validate_path(&container_path.child("initrdPath"), &container.initrd_path));
    }
    findings
}

/// SecureBoot needs SMM explicitly enabled
fn secure_boot_smm(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let secure_boot = spec.domain.efi().is_some_and(|efi| efi.secure_boot_enabled());
    let smm = spec
        .domain
        .features
        .as_ref()
        .and_then(|f| f.smm.as_ref())
        .is_some_and(|smm| smm.is_enabled());

    if secure_boot && !smm {
        let path = field.child("domain");
        vec![Finding::invalid(
            &path,
            format!("{path} has EFI SecureBoot enabled. SecureBoot requires SMM, which is currently disabled."),
        )]
    } else {
        Vec::new()
    }
}

/// SEV requirements, checked once the gate is enabled
fn sev(field: &FieldPath, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Vec<Finding> {
    if !config.is_enabled(FeatureGate::WorkloadEncryptionSev) {
        return Vec::new();
    }
    let Some(sev) = spec
        .domain
        .launch_security
        .as_ref()
        .and_then(|ls| ls.sev.as_ref())
    else {
        return Vec::new();
    };

    let path = field.child("launchSecurity");
    let mut findings = Vec::new();

    match spec.domain.efi() {
        None => findings.push(Finding::invalid(&path, "SEV requires OVMF (UEFI)")),
        Some(efi) if efi.secure_boot_enabled() => {
            findings.push(Finding::invalid(&path, "SEV does not work along with SecureBoot"))
        }
        Some(_) => {}
    }

    if sev.attestation.is_some() && spec.start_strategy.as_deref() != Some(START_STRATEGY_PAUSED) {
        findings.push(Finding::invalid(
            &path,
            format!("SEV attestation requires VMI StartStrategy '{START_STRATEGY_PAUSED}'"),
        ));
    }

    for iface in spec
        .domain
        .devices
        .interfaces
        .iter()
        .filter(|i| i.boot_order.is_some())
    {
        findings.push(Finding::invalid(
            &path,
            format!("SEV does not work with bootable NICs: {}", iface.name),
        ));
    }
    findings
}
