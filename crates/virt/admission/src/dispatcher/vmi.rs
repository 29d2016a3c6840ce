//! Instance admitter

use super::{Admitter, Verdict};
use crate::context::AdmissionContext;
use crate::engine::ValidationEngine;
use crate::envelope::{AdmissionRequest, Operation, ResourceKind};
use crate::error::{AdmissionError, Result};
use crate::field::FieldPath;
use crate::mutability::MutabilityController;
use async_trait::async_trait;
use virt_types::{ClusterConfig, VirtualMachineInstance};

const KIND: &str = "VirtualMachineInstance";

/// Admits instance creation, updates and deletion
#[derive(Debug, Clone)]
pub struct VmiAdmitter {
    engine: ValidationEngine,
    controller: MutabilityController,
}

impl VmiAdmitter {
    pub fn new(engine: ValidationEngine, controller: MutabilityController) -> Self {
        Self { engine, controller }
    }

    fn admit_create(&self, request: &AdmissionRequest, ctx: &AdmissionContext, config: &ClusterConfig) -> Result<Verdict> {
        let vmi: VirtualMachineInstance = virt_types::decode(KIND, &request.object)?;
        let metadata = FieldPath::new("metadata");

        let mut outcome = self
            .engine
            .validate_instance_create(&FieldPath::new("spec"), &vmi.spec, config);
        outcome.merge(self.engine.validate_metadata(&metadata, &vmi.metadata, config));
        outcome.extend(self.controller.label_guard().check_at(
            &metadata,
            &vmi.metadata.labels,
            ctx.capabilities.can_set_privileged_labels(),
        ));
        Ok(outcome.into())
    }

    async fn admit_update(
        &self,
        request: &AdmissionRequest,
        ctx: &AdmissionContext,
        config: &ClusterConfig,
    ) -> Result<Verdict> {
        let raw_old = request
            .old_object
            .as_deref()
            .ok_or_else(|| AdmissionError::MissingOldObject { kind: KIND.to_string() })?;
        let old: VirtualMachineInstance = virt_types::decode(KIND, raw_old)?;
        let new: VirtualMachineInstance = virt_types::decode(KIND, &request.object)?;

        let review = self.controller.review(ctx, &old, &new, config).await;
        Ok(review.outcome.into())
    }
}

#[async_trait]
impl Admitter for VmiAdmitter {
    fn id(&self) -> &str {
        "vmi"
    }

    fn name(&self) -> &str {
        "VirtualMachineInstance Admitter"
    }

    fn applies_to(&self, kind: &ResourceKind, operation: Operation) -> bool {
        *kind == ResourceKind::VirtualMachineInstance
            && matches!(operation, Operation::Create | Operation::Update | Operation::Delete)
    }

    async fn admit(
        &self,
        request: &AdmissionRequest,
        ctx: &AdmissionContext,
        config: &ClusterConfig,
    ) -> Result<Verdict> {
        if request.kind != ResourceKind::VirtualMachineInstance {
            return Err(AdmissionError::UnexpectedKind {
                expected: ResourceKind::VirtualMachineInstance.resource_name().to_string(),
            });
        }

        match request.operation {
            Operation::Create => self.admit_create(request, ctx, config),
            Operation::Update => self.admit_update(request, ctx, config).await,
            Operation::Delete | Operation::Connect => Ok(Verdict::allow()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CapabilitySet;
    use crate::engine::tests::valid_spec;
    use crate::finding::FindingKind;
    use crate::labels::LabelGuard;
    use crate::lookup::InMemoryLookup;
    use crate::mutability::VolumeHotplugPolicy;
    use std::sync::Arc;
    use virt_types::FeatureGate;

    fn admitter() -> VmiAdmitter {
        let engine = ValidationEngine::new().unwrap();
        let storage = Arc::new(VolumeHotplugPolicy::new(Arc::new(InMemoryLookup::new())));
        VmiAdmitter::new(
            engine.clone(),
            MutabilityController::new(engine, storage, LabelGuard::default()),
        )
    }

    fn vmi() -> VirtualMachineInstance {
        VirtualMachineInstance::new("testvmi", "default", valid_spec())
    }

    fn create(vmi: &VirtualMachineInstance) -> AdmissionRequest {
        AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Create).with_object(vmi)
    }

    fn findings(verdict: Verdict) -> Vec<crate::finding::Finding> {
        match verdict {
            Verdict::Validated(outcome) => outcome.findings,
            Verdict::Denied { .. } => panic!("unexpected denial"),
        }
    }

    #[test]
    fn test_applies_to() {
        let admitter = admitter();
        assert!(admitter.applies_to(&ResourceKind::VirtualMachineInstance, Operation::Create));
        assert!(admitter.applies_to(&ResourceKind::VirtualMachineInstance, Operation::Delete));
        assert!(!admitter.applies_to(&ResourceKind::VirtualMachineInstance, Operation::Connect));
        assert!(!admitter.applies_to(&ResourceKind::VirtualMachine, Operation::Create));
    }

    #[tokio::test]
    async fn test_wrong_kind() {
        let request = AdmissionRequest::new(ResourceKind::VirtualMachine, Operation::Create).with_object(&vmi());
        let err = admitter()
            .admit(&request, &AdmissionContext::default(), &ClusterConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "expect resource to be 'virtualmachineinstances'");
    }

    #[tokio::test]
    async fn test_create_checks_metadata_and_labels() {
        let mut vmi = vmi();
        vmi.metadata.labels.insert("kubevirt.io/nodeName".into(), "node01".into());
        vmi.metadata
            .annotations
            .insert("hooks.kubevirt.io/hookSidecars".into(), "[]".into());

        let verdict = admitter()
            .admit(&create(&vmi), &AdmissionContext::default(), &ClusterConfig::default())
            .await
            .unwrap();
        let findings = findings(verdict);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].field.to_string(), "metadata.annotations");
        assert_eq!(findings[1].field.to_string(), "metadata.labels");
        assert_eq!(findings[1].kind, FindingKind::NotSupported);
    }

    #[tokio::test]
    async fn test_create_with_gate_and_privilege() {
        let mut vmi = vmi();
        vmi.metadata.labels.insert("kubevirt.io/nodeName".into(), "node01".into());
        vmi.metadata
            .annotations
            .insert("hooks.kubevirt.io/hookSidecars".into(), "[]".into());
        let ctx = AdmissionContext::default().with_capabilities(CapabilitySet::privileged());
        let config = ClusterConfig::default().with_gate(FeatureGate::Sidecar);

        let verdict = admitter().admit(&create(&vmi), &ctx, &config).await.unwrap();
        assert!(verdict.is_allowed());
    }

    #[tokio::test]
    async fn test_update_without_old_object() {
        let request = AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Update).with_object(&vmi());
        let err = admitter()
            .admit(&request, &AdmissionContext::default(), &ClusterConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::MissingOldObject { .. }));
    }

    #[tokio::test]
    async fn test_update_label_only() {
        let old = vmi();
        let mut new = old.clone();
        new.metadata.labels.insert("app".into(), "web".into());
        let request = AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Update)
            .with_object(&new)
            .with_old_object(&old);

        let verdict = admitter()
            .admit(&request, &AdmissionContext::default(), &ClusterConfig::default())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::allow());
    }

    #[tokio::test]
    async fn test_delete_allowed() {
        let request = AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Delete);
        let verdict = admitter()
            .admit(&request, &AdmissionContext::default(), &ClusterConfig::default())
            .await
            .unwrap();
        assert!(verdict.is_allowed());
    }
}
