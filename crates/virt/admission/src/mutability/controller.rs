//! Update path for instances

use super::hotplug::StorageHotplugPolicy;
use super::node::check_node_restriction;
use super::policy::{classify, DiffClass, MutationDiff, Subtree};
use crate::context::AdmissionContext;
use crate::engine::ValidationEngine;
use crate::field::FieldPath;
use crate::finding::{Finding, ValidationOutcome};
use crate::labels::LabelGuard;
use std::sync::Arc;
use tracing::debug;
use virt_types::{ClusterConfig, VirtualMachineInstance};

const SPEC_IMMUTABLE: &str = "spec is immutable";

/// Result of reviewing an update
#[derive(Debug, Clone, PartialEq)]
pub struct MutationReview {
    /// How the spec changed
    pub diff: MutationDiff,

    /// Everything that rejects the update
    pub outcome: ValidationOutcome,
}

impl MutationReview {
    pub fn is_allowed(&self) -> bool {
        self.outcome.is_allowed()
    }
}

/// Decides which updates a running instance accepts
///
/// Specs are immutable unless the actor may mutate them, in which case the
/// hotplug subset may change. Whatever the controller lets through is then
/// validated like a new spec.
#[derive(Debug, Clone)]
pub struct MutabilityController {
    engine: ValidationEngine,
    storage: Arc<dyn StorageHotplugPolicy>,
    labels: LabelGuard,
}

impl MutabilityController {
    pub fn new(engine: ValidationEngine, storage: Arc<dyn StorageHotplugPolicy>, labels: LabelGuard) -> Self {
        Self {
            engine,
            storage,
            labels,
        }
    }

    pub fn label_guard(&self) -> &LabelGuard {
        &self.labels
    }

    /// Review the update of `old` into `new`
    pub async fn review(
        &self,
        ctx: &AdmissionContext,
        old: &VirtualMachineInstance,
        new: &VirtualMachineInstance,
        config: &ClusterConfig,
    ) -> MutationReview {
        if old == new {
            return MutationReview {
                diff: MutationDiff::identical(),
                outcome: ValidationOutcome::default(),
            };
        }

        let root = FieldPath::new("spec");
        let mut outcome = ValidationOutcome::default();
        outcome.extend(check_node_restriction(&ctx.capabilities, old, new));
        outcome.extend(self.labels.check_update(
            &old.metadata.labels,
            &new.metadata.labels,
            ctx.capabilities.can_set_privileged_labels(),
        ));

        let mut diff = classify(&root, &old.spec, &new.spec);
        if diff.is_identical() {
            return MutationReview { diff, outcome };
        }

        if !ctx.capabilities.can_mutate_spec() {
            diff.class = DiffClass::ChangedRejected;
            outcome.push(Finding::not_supported(&root, SPEC_IMMUTABLE));
            debug!(request_id = %ctx.request_id, actor = %ctx.actor(), "Spec update by unprivileged actor");
            return MutationReview { diff, outcome };
        }

        if diff.touches(Subtree::Storage) {
            let findings = self.storage.check(&root, old, new, config).await;
            diff.resolve(Subtree::Storage, findings);
        }
        outcome.extend(diff.findings());

        if diff.is_allowed() {
            outcome.merge(self.engine.validate_at(&root, &new.spec, config));
        }
        debug!(
            request_id = %ctx.request_id,
            class = ?diff.class,
            findings = outcome.findings.len(),
            "Reviewed spec update"
        );
        MutationReview { diff, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CapabilitySet, UserInfo};
    use crate::engine::tests::valid_spec;
    use crate::finding::FindingKind;
    use crate::lookup::InMemoryLookup;
    use crate::mutability::hotplug::VolumeHotplugPolicy;
    use proptest::prelude::*;
    use virt_types::devices::bus;
    use virt_types::vmi::VolumeStatus;
    use virt_types::{Cpu, Disk, Volume};

    fn controller() -> MutabilityController {
        MutabilityController::new(
            ValidationEngine::new().unwrap(),
            Arc::new(VolumeHotplugPolicy::new(Arc::new(InMemoryLookup::new()))),
            LabelGuard::default(),
        )
    }

    fn actor(capabilities: CapabilitySet) -> AdmissionContext {
        AdmissionContext::new(UserInfo::new("someone")).with_capabilities(capabilities)
    }

    fn running() -> VirtualMachineInstance {
        let mut vmi = VirtualMachineInstance::new("vmi", "default", valid_spec());
        vmi.status.node_name = Some("node01".into());
        vmi.status.volume_status = vec![VolumeStatus {
            name: "rootdisk".into(),
            target: "vda".into(),
            ..Default::default()
        }];
        vmi
    }

    fn with_sockets(sockets: u32, max_sockets: u32) -> VirtualMachineInstance {
        let mut vmi = running();
        vmi.spec.domain.cpu = Some(Cpu {
            cores: 1,
            threads: 1,
            sockets,
            max_sockets,
            ..Default::default()
        });
        vmi
    }

    fn hotplug_disk(vmi: &mut VirtualMachineInstance, disk: Disk) {
        vmi.spec.volumes.push(Volume::pvc(disk.name.clone(), "claim"));
        vmi.spec.domain.devices.disks.push(disk);
    }

    #[tokio::test]
    async fn test_lowering_max_sockets_rejected_for_any_actor() {
        let old = with_sockets(8, 8);
        let new = with_sockets(8, 4);
        let config = ClusterConfig::default();

        for capabilities in [CapabilitySet::none(), CapabilitySet::privileged()] {
            let review = controller().review(&actor(capabilities), &old, &new, &config).await;
            assert!(!review.is_allowed());
            assert_eq!(review.diff.class, DiffClass::ChangedRejected);
        }
    }

    #[tokio::test]
    async fn test_label_only_update_by_plain_actor() {
        let old = running();
        let mut new = old.clone();
        new.metadata.labels.insert("app".into(), "web".into());

        let review = controller()
            .review(&actor(CapabilitySet::none()), &old, &new, &ClusterConfig::default())
            .await;
        assert!(review.is_allowed());
        assert!(review.outcome.findings.is_empty());
        assert!(review.diff.is_identical());
    }

    #[tokio::test]
    async fn test_reserved_label_update_by_plain_actor() {
        let old = running();
        let mut new = old.clone();
        new.metadata.labels.insert("kubevirt.io/nodeName".into(), "node02".into());

        let review = controller()
            .review(&actor(CapabilitySet::none()), &old, &new, &ClusterConfig::default())
            .await;
        assert_eq!(review.outcome.findings.len(), 1);
        assert_eq!(review.outcome.findings[0].field.to_string(), "metadata.labels");
    }

    #[tokio::test]
    async fn test_spec_is_immutable_for_plain_actor() {
        let old = with_sockets(2, 8);
        let new = with_sockets(4, 8);

        let review = controller()
            .review(&actor(CapabilitySet::none()), &old, &new, &ClusterConfig::default())
            .await;
        assert_eq!(review.outcome.findings.len(), 1);
        assert_eq!(review.outcome.findings[0].kind, FindingKind::NotSupported);
        assert_eq!(review.outcome.findings[0].message, "spec is immutable");
    }

    #[tokio::test]
    async fn test_socket_hotplug_by_privileged_actor() {
        let review = controller()
            .review(
                &actor(CapabilitySet::privileged()),
                &with_sockets(2, 8),
                &with_sockets(4, 8),
                &ClusterConfig::default(),
            )
            .await;
        assert!(review.is_allowed(), "{:?}", review.outcome.findings);
        assert_eq!(review.diff.class, DiffClass::ChangedAllowed);
    }

    #[tokio::test]
    async fn test_allowed_change_still_validated() {
        let old = running();
        let mut new = old.clone();
        let mut disk = Disk::new("hp1", bus::SCSI);
        disk.cache = Some("bogus".into());
        hotplug_disk(&mut new, disk);

        let review = controller()
            .review(&actor(CapabilitySet::privileged()), &old, &new, &ClusterConfig::default())
            .await;
        assert_eq!(review.diff.class, DiffClass::ChangedAllowed);
        assert_eq!(review.outcome.findings.len(), 1);
        assert_eq!(
            review.outcome.findings[0].field.to_string(),
            "spec.domain.devices.disks[1].cache"
        );
    }

    #[tokio::test]
    async fn test_node_agent_for_other_node() {
        let old = running();
        let mut new = old.clone();
        new.status.phase = Some("Running".into());

        let review = controller()
            .review(&actor(CapabilitySet::node_agent("node02")), &old, &new, &ClusterConfig::default())
            .await;
        assert!(!review.is_allowed());

        let review = controller()
            .review(&actor(CapabilitySet::node_agent("node01")), &old, &new, &ClusterConfig::default())
            .await;
        assert!(review.is_allowed());
    }

    proptest! {
        #[test]
        fn property_no_op_update_allowed(sockets in 1u32..8, node in "node0[1-3]", privileged in any::<bool>()) {
            let vmi = with_sockets(sockets, 8);
            let capabilities = if privileged {
                CapabilitySet::node_agent(node)
            } else {
                CapabilitySet::none()
            };
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let review = runtime.block_on(controller().review(
                &actor(capabilities),
                &vmi,
                &vmi.clone(),
                &ClusterConfig::default(),
            ));
            prop_assert!(review.is_allowed());
            prop_assert!(review.outcome.findings.is_empty());
        }
    }
}
