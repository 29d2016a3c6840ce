//! Virtual machine admitter
//!
//! A virtual machine is judged in stages and the first stage with findings
//! decides:
//!
//! 1. The spec rules, template included
//! 2. Pending volume requests, simulated on the template and on the running
//!    instance
//! 3. On update, the snapshot and restore guards
//!
//! Virtual machines being deleted are always admitted.
//!
//! ## Status updates
//!
//! Writes to the `status` subresource skip the spec rules. They run the
//! volume request stage and, on update, the snapshot and restore guards.

use super::{Admitter, Verdict};
use crate::context::AdmissionContext;
use crate::engine::ValidationEngine;
use crate::envelope::{AdmissionRequest, Operation, ResourceKind};
use crate::error::{AdmissionError, Result};
use crate::field::FieldPath;
use crate::finding::{Finding, ValidationOutcome};
use crate::lookup::ResourceLookup;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use virt_types::devices::bus;
use virt_types::vm::AddVolumeOptions;
use virt_types::{ClusterConfig, RunStrategy, VirtualMachine, VirtualMachineInstance, VirtualMachineSpec};

const KIND: &str = "VirtualMachine";

pub const RUNNING_DEPRECATED_WARNING: &str = "spec.running is deprecated, please use spec.runStrategy instead.";

/// Admits virtual machine creation and updates
#[derive(Debug, Clone)]
pub struct VmAdmitter {
    engine: ValidationEngine,
    lookup: Arc<dyn ResourceLookup>,
}

impl VmAdmitter {
    pub fn new(engine: ValidationEngine, lookup: Arc<dyn ResourceLookup>) -> Self {
        Self { engine, lookup }
    }

    /// Check pending volume requests against the template and the running instance
    async fn check_volume_requests(&self, vm: &VirtualMachine, namespace: &str, config: &ClusterConfig) -> Vec<Finding> {
        let requests = &vm.status.volume_requests;
        if requests.is_empty() {
            return Vec::new();
        }
        let Some(template) = &vm.spec.template else {
            return Vec::new();
        };

        let mut vmi = if vm.status.ready {
            match self.lookup.get_vmi(namespace, &vm.metadata.name).await {
                Ok(vmi) if vmi.metadata.is_being_deleted() => None,
                Ok(vmi) => Some(vmi),
                Err(err) if err.is_not_found() => None,
                Err(err) => {
                    warn!(vm = %vm.metadata.name, error = %err, "Instance lookup failed");
                    return vec![Finding::server_error(
                        &FieldPath::root(),
                        format!("could not fetch the running instance: {err}"),
                    )];
                }
            }
        } else {
            None
        };

        let field = FieldPath::from_children(&["status", "volumeRequests"]);
        let mut adds = HashSet::new();
        let mut removes = HashSet::new();
        let mut template_spec = template.spec.clone();

        for request in requests {
            match (&request.add_volume_options, &request.remove_volume_options) {
                (Some(_), Some(_)) => {
                    return vec![Finding::invalid(
                        &field,
                        "VolumeRequests require either addVolumeOptions or removeVolumeOptions to be set, not both",
                    )];
                }
                (Some(add), None) => {
                    let name = add.name.as_str();
                    if !adds.insert(name) {
                        return vec![Finding::invalid(
                            &field,
                            format!("AddVolume request for [{name}] aleady exists"),
                        )];
                    }
                    if let Some(message) = disk_configuration(add) {
                        return vec![Finding::invalid(&field, message)];
                    }

                    let volume = add.volume();
                    if template.spec.volume(name).is_some_and(|v| *v != volume) {
                        return vec![Finding::invalid(
                            &field,
                            format!("AddVolume request for [{name}] conflicts with an existing volume of the same name on the vmi template."),
                        )];
                    }
                    let running = vmi.as_ref().and_then(|vmi| vmi.spec.volume(name));
                    if running.is_some_and(|v| *v != volume) {
                        return vec![Finding::invalid(
                            &field,
                            format!("AddVolume request for [{name}] conflicts with an existing volume of the same name on currently running vmi"),
                        )];
                    }
                }
                (None, Some(remove)) => {
                    let name = remove.name.as_str();
                    if !removes.insert(name) {
                        return vec![Finding::invalid(
                            &field,
                            format!("RemoveVolume request for [{name}] aleady exists"),
                        )];
                    }
                }
                (None, None) => {
                    return vec![Finding::invalid(
                        &field,
                        "VolumeRequests require one of either addVolumeOptions or removeVolumeOptions to be set",
                    )];
                }
            }

            request.apply_to(&mut template_spec);
            if let Some(vmi) = vmi.as_mut() {
                request.apply_to(&mut vmi.spec);
            }
        }

        let root = FieldPath::from_children(&["spec", "template", "spec"]);
        let outcome = self.engine.validate_at(&root, &template_spec, config);
        if !outcome.is_allowed() {
            return outcome.findings;
        }

        if let Some(vmi) = vmi {
            return running_instance(&self.engine, &root, &vmi, config);
        }
        Vec::new()
    }
}

/// Findings for the running instance with the requests applied
fn running_instance(
    engine: &ValidationEngine,
    root: &FieldPath,
    vmi: &VirtualMachineInstance,
    config: &ClusterConfig,
) -> Vec<Finding> {
    let outcome = engine.validate_at(root, &vmi.spec, config);
    if !outcome.is_allowed() {
        return outcome.findings;
    }
    if vmi.is_migrating() {
        return vec![Finding::not_supported(
            &FieldPath::new("spec"),
            "Cannot handle volume requests while VMI migration is in progress",
        )];
    }
    Vec::new()
}

/// Hotplugged disks must be scsi disks or luns without a dedicated IO thread
fn disk_configuration(add: &AddVolumeOptions) -> Option<String> {
    let name = &add.name;
    let Some(disk) = &add.disk else {
        return Some(format!("AddVolume request for [{name}] requires the disk field to be set."));
    };
    let target_bus = match (&disk.disk, &disk.lun) {
        (Some(target), _) => target.bus.as_str(),
        (None, Some(lun)) => lun.bus.as_str(),
        (None, None) => {
            return Some(format!(
                "AddVolume request for [{name}] requires diskDevice of type 'disk' or 'lun' to be used."
            ))
        }
    };
    if target_bus != bus::SCSI {
        return Some(format!(
            "AddVolume request for [{name}] requires disk bus to be 'scsi'. [{target_bus}] is not permitted"
        ));
    }
    if disk.wants_dedicated_io_thread() {
        return Some("IOThreads are not supported by scsi bus.".to_string());
    }
    None
}

/// Whether the run switch is unchanged
///
/// Specs using different switches never compare equal.
fn same_running_state(old: &VirtualMachineSpec, new: &VirtualMachineSpec) -> bool {
    match (old.running, new.running, &old.run_strategy, &new.run_strategy) {
        (Some(old), Some(new), _, _) => old == new,
        (_, _, Some(old), Some(new)) => old == new,
        _ => false,
    }
}

/// Strategy in effect, with the boolean switch translated
fn effective_run_strategy(spec: &VirtualMachineSpec) -> Option<String> {
    match (spec.running, &spec.run_strategy) {
        (Some(true), _) => Some(RunStrategy::Always.to_string()),
        (Some(false), _) => Some(RunStrategy::Halted.to_string()),
        (None, strategy) => strategy.clone(),
    }
}

fn snapshot_guard(old: &VirtualMachine, new: &VirtualMachine) -> Option<Finding> {
    let snapshot = new.status.snapshot_in_progress.as_ref()?;
    let spec = FieldPath::new("spec");

    let volumes = |vm: &VirtualMachine| vm.spec.template.as_ref().map(|t| t.spec.volumes.clone()).unwrap_or_default();
    if volumes(old) != volumes(new) {
        return Some(Finding::not_supported(
            &spec,
            format!("Cannot update VM disks or volumes until snapshot \"{snapshot}\" completes"),
        ));
    }
    if !same_running_state(&old.spec, &new.spec) {
        return Some(Finding::not_supported(
            &spec,
            format!("Cannot update VM running state until snapshot \"{snapshot}\" completes"),
        ));
    }
    None
}

fn restore_guard(old: &VirtualMachine, new: &VirtualMachine) -> Option<Finding> {
    let restore = new.status.restore_in_progress.as_ref()?;
    if old.spec == new.spec || effective_run_strategy(&old.spec) == effective_run_strategy(&new.spec) {
        return None;
    }
    Some(Finding::not_supported(
        &FieldPath::new("spec"),
        format!("Cannot update VM runStrategy until restore \"{restore}\" completes"),
    ))
}

/// Snapshot and restore guards against the previous object
fn progress_guards(request: &AdmissionRequest, vm: &VirtualMachine) -> Result<Option<Finding>> {
    if request.operation != Operation::Update {
        return Ok(None);
    }
    let raw_old = request
        .old_object
        .as_deref()
        .ok_or_else(|| AdmissionError::MissingOldObject { kind: KIND.to_string() })?;
    if vm.status.snapshot_in_progress.is_none() && vm.status.restore_in_progress.is_none() {
        return Ok(None);
    }
    let finding = match virt_types::decode::<VirtualMachine>(KIND, raw_old) {
        Ok(old) => snapshot_guard(&old, vm).or_else(|| restore_guard(&old, vm)),
        Err(_) => Some(Finding::server_error(&FieldPath::root(), "Could not fetch old VM")),
    };
    Ok(finding)
}

fn namespace_of<'a>(request: &'a AdmissionRequest, vm: &'a VirtualMachine) -> &'a str {
    if vm.metadata.namespace.is_empty() {
        request.namespace.as_str()
    } else {
        vm.metadata.namespace.as_str()
    }
}

impl VmAdmitter {
    /// Admit a write to the status subresource
    async fn admit_status(
        &self,
        request: &AdmissionRequest,
        vm: &VirtualMachine,
        config: &ClusterConfig,
    ) -> Result<Verdict> {
        let findings = self.check_volume_requests(vm, namespace_of(request, vm), config).await;
        if !findings.is_empty() {
            debug!(vm = %vm.metadata.name, "Status volume requests rejected");
            return Ok(ValidationOutcome::from_findings(findings).into());
        }
        if let Some(finding) = progress_guards(request, vm)? {
            return Ok(ValidationOutcome::from_findings(vec![finding]).into());
        }
        Ok(Verdict::allow())
    }
}

#[async_trait]
impl Admitter for VmAdmitter {
    fn id(&self) -> &str {
        "vm"
    }

    fn name(&self) -> &str {
        "VirtualMachine Admitter"
    }

    fn applies_to(&self, kind: &ResourceKind, operation: Operation) -> bool {
        matches!(kind, ResourceKind::VirtualMachine | ResourceKind::VirtualMachineStatus)
            && matches!(operation, Operation::Create | Operation::Update)
    }

    async fn admit(
        &self,
        request: &AdmissionRequest,
        ctx: &AdmissionContext,
        config: &ClusterConfig,
    ) -> Result<Verdict> {
        let status_only = match request.kind {
            ResourceKind::VirtualMachine => false,
            ResourceKind::VirtualMachineStatus => true,
            _ => {
                return Err(AdmissionError::UnexpectedKind {
                    expected: ResourceKind::VirtualMachine.resource_name().to_string(),
                })
            }
        };

        let vm: VirtualMachine = virt_types::decode(KIND, &request.object)?;
        if status_only {
            return self.admit_status(request, &vm, config).await;
        }
        if vm.metadata.is_being_deleted() {
            debug!(request_id = %ctx.request_id, vm = %vm.metadata.name, "Virtual machine is being deleted");
            return Ok(Verdict::allow());
        }

        let mut outcome = self.engine.validate_vm(&FieldPath::new("spec"), &vm.spec, config);
        if !outcome.is_allowed() {
            return Ok(outcome.into());
        }

        let findings = self.check_volume_requests(&vm, namespace_of(request, &vm), config).await;
        if !findings.is_empty() {
            return Ok(ValidationOutcome::from_findings(findings).into());
        }

        if let Some(finding) = progress_guards(request, &vm)? {
            return Ok(ValidationOutcome::from_findings(vec![finding]).into());
        }

        if vm.spec.running.is_some() {
            outcome.warn(RUNNING_DEPRECATED_WARNING);
        }
        Ok(outcome.into())
    }
}
