//! Validation engine
//!
//! The engine runs the rule tables of a [`RuleRegistry`] against a subject
//! and gathers the findings into a [`ValidationOutcome`]. It owns no state
//! beyond the registry, so one engine can serve every request concurrently.
//!
//! ## Roots
//!
//! Every entry point takes the locator its subject lives at. Standalone
//! instances are validated at `spec`; virtual machine templates at
//! `spec.template.spec`; [`ValidationEngine::validate`] uses the empty root.

use crate::error::RuleError;
use crate::field::FieldPath;
use crate::finding::ValidationOutcome;
use crate::rules::RuleRegistry;
use std::sync::Arc;
use tracing::debug;
use virt_types::{ClusterConfig, MigrationSpec, ObjectMeta, VirtualMachineInstanceSpec, VirtualMachineSpec};

/// Runs rule tables against specs
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    registry: Arc<RuleRegistry>,
}

impl ValidationEngine {
    /// Engine over the built-in rules
    pub fn new() -> Result<Self, RuleError> {
        Ok(Self::with_registry(RuleRegistry::builtin()?))
    }

    /// Engine over a custom registry
    pub fn with_registry(registry: RuleRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Validate an instance spec at the empty root
    pub fn validate(&self, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> ValidationOutcome {
        self.validate_at(&FieldPath::root(), spec, config)
    }

    /// Validate an instance spec rooted at `root`
    pub fn validate_at(
        &self,
        root: &FieldPath,
        spec: &VirtualMachineInstanceSpec,
        config: &ClusterConfig,
    ) -> ValidationOutcome {
        let findings = self.registry.vmi_spec.evaluate(root, spec, config);
        debug!(root = %root, findings = findings.len(), "Validated instance spec");
        ValidationOutcome::from_findings(findings)
    }

    /// Validate a standalone instance being created
    pub fn validate_instance_create(
        &self,
        root: &FieldPath,
        spec: &VirtualMachineInstanceSpec,
        config: &ClusterConfig,
    ) -> ValidationOutcome {
        let mut outcome = self.validate_at(root, spec, config);
        outcome.extend(self.registry.vmi_extras.evaluate(root, spec, config));
        outcome
    }

    /// Validate object metadata rooted at `root`
    pub fn validate_metadata(&self, root: &FieldPath, meta: &ObjectMeta, config: &ClusterConfig) -> ValidationOutcome {
        ValidationOutcome::from_findings(self.registry.metadata.evaluate(root, meta, config))
    }

    /// Validate a virtual machine spec rooted at `root`
    ///
    /// The template's metadata and spec are checked first, then the rules
    /// over the rest of the virtual machine.
    pub fn validate_vm(&self, root: &FieldPath, spec: &VirtualMachineSpec, config: &ClusterConfig) -> ValidationOutcome {
        let vm_findings = self.registry.vm_spec.evaluate(root, spec, config);

        let Some(template) = &spec.template else {
            return ValidationOutcome::from_findings(vm_findings);
        };

        let template_root = root.child("template");
        let mut outcome = self.validate_metadata(&template_root.child("metadata"), &template.metadata, config);
        outcome.merge(self.validate_at(&template_root.child("spec"), &template.spec, config));
        outcome.extend(vm_findings);
        outcome
    }

    /// Validate a migration spec rooted at `root`
    pub fn validate_migration(&self, root: &FieldPath, spec: &MigrationSpec, config: &ClusterConfig) -> ValidationOutcome {
        ValidationOutcome::from_findings(self.registry.migration.evaluate(root, spec, config))
    }
}
