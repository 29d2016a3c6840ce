//! Migration admitter
//!
//! A migration may only be created for an instance that exists, runs, is
//! migratable and is not already migrating. Once created its spec is frozen.

use super::{Admitter, Verdict};
use crate::context::AdmissionContext;
use crate::engine::ValidationEngine;
use crate::envelope::{AdmissionRequest, Operation, ResourceKind};
use crate::error::{AdmissionError, Result};
use crate::field::FieldPath;
use crate::finding::{Finding, ValidationOutcome};
use crate::lookup::ResourceLookup;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use virt_types::vmi::CONDITION_MIGRATABLE;
use virt_types::{ClusterConfig, VirtualMachineInstance, VirtualMachineInstanceMigration};

const KIND: &str = "VirtualMachineInstanceMigration";

const PHASE_RUNNING: &str = "Running";

/// Admits migration creation and updates
#[derive(Debug, Clone)]
pub struct MigrationAdmitter {
    engine: ValidationEngine,
    lookup: Arc<dyn ResourceLookup>,
}

impl MigrationAdmitter {
    pub fn new(engine: ValidationEngine, lookup: Arc<dyn ResourceLookup>) -> Self {
        Self { engine, lookup }
    }

    async fn admit_create(&self, request: &AdmissionRequest, config: &ClusterConfig) -> Result<Verdict> {
        let migration: VirtualMachineInstanceMigration = virt_types::decode(KIND, &request.object)?;
        let outcome = self
            .engine
            .validate_migration(&FieldPath::new("spec"), &migration.spec, config);
        if !outcome.is_allowed() {
            return Ok(outcome.into());
        }

        let namespace = if migration.metadata.namespace.is_empty() {
            request.namespace.as_str()
        } else {
            migration.metadata.namespace.as_str()
        };
        let vmi_name = &migration.spec.vmi_name;
        let vmi = match self.lookup.get_vmi(namespace, vmi_name).await {
            Ok(vmi) => vmi,
            Err(err) if err.is_not_found() => {
                return Err(AdmissionError::Precondition {
                    reason: format!("the VMI {vmi_name} does not exist"),
                })
            }
            Err(err) => {
                warn!(vmi = %vmi_name, error = %err, "Instance lookup failed");
                return Ok(ValidationOutcome::from_findings(vec![Finding::server_error(
                    &FieldPath::root(),
                    format!("could not fetch VMI {vmi_name}: {err}"),
                )])
                .into());
            }
        };

        check_migratable(&vmi)?;
        Ok(Verdict::allow())
    }

    fn admit_update(&self, request: &AdmissionRequest) -> Result<Verdict> {
        let raw_old = request
            .old_object
            .as_deref()
            .ok_or_else(|| AdmissionError::MissingOldObject { kind: KIND.to_string() })?;
        let old: VirtualMachineInstanceMigration = virt_types::decode(KIND, raw_old)?;
        let new: VirtualMachineInstanceMigration = virt_types::decode(KIND, &request.object)?;

        if old.spec != new.spec {
            return Ok(ValidationOutcome::from_findings(vec![Finding::not_supported(
                &FieldPath::root(),
                "update of Migration object's spec is restricted",
            )])
            .into());
        }
        Ok(Verdict::allow())
    }
}

/// Preconditions on the instance a migration targets
fn check_migratable(vmi: &VirtualMachineInstance) -> Result<()> {
    let precondition = |reason: String| Err(AdmissionError::Precondition { reason });

    if vmi.is_final() {
        return precondition("Cannot migrate VMI in finalized state.".to_string());
    }
    if vmi.status.phase.as_deref() != Some(PHASE_RUNNING) {
        return precondition(format!("Cannot migrate VMI {} that is not running.", vmi.metadata.name));
    }
    if let Some(cond) = vmi.status.condition(CONDITION_MIGRATABLE) {
        if cond.status == "False" {
            return precondition(format!(
                "Cannot migrate VMI, Reason: {}, Message: {}",
                cond.reason, cond.message
            ));
        }
    }
    if let Some(state) = &vmi.status.migration_state {
        if !state.migration_uid.is_empty() && !state.completed && !state.failed {
            return precondition(format!(
                "in-flight migration detected. Active migration job ({}) is currently already in progress for VMI {}.",
                state.migration_uid, vmi.metadata.name
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl Admitter for MigrationAdmitter {
    fn id(&self) -> &str {
        "migration"
    }

    fn name(&self) -> &str {
        "VirtualMachineInstanceMigration Admitter"
    }

    fn applies_to(&self, kind: &ResourceKind, operation: Operation) -> bool {
        *kind == ResourceKind::VirtualMachineInstanceMigration
            && matches!(operation, Operation::Create | Operation::Update)
    }

    async fn admit(
        &self,
        request: &AdmissionRequest,
        _ctx: &AdmissionContext,
        config: &ClusterConfig,
    ) -> Result<Verdict> {
        if request.kind != ResourceKind::VirtualMachineInstanceMigration {
            return Err(AdmissionError::UnexpectedKind {
                expected: ResourceKind::VirtualMachineInstanceMigration.resource_name().to_string(),
            });
        }

        match request.operation {
            Operation::Create => self.admit_create(request, config).await,
            Operation::Update => self.admit_update(request),
            Operation::Delete | Operation::Connect => Ok(Verdict::allow()),
        }
    }
}
