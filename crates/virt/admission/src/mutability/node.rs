//! Node restriction
//!
//! A node agent may only touch instances hosted on its own node, or
//! instances migrating to it. It can never pick a migration target.

use crate::context::CapabilitySet;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::VirtualMachineInstance;

fn target_node(vmi: &VirtualMachineInstance) -> Option<&str> {
    vmi.status
        .migration_state
        .as_ref()
        .map(|state| state.target_node.as_str())
        .filter(|node| !node.is_empty())
}

/// Findings for a node agent updating `old` into `new`
///
/// Actors that do not act for a node are never restricted.
pub fn check_node_restriction(
    capabilities: &CapabilitySet,
    old: &VirtualMachineInstance,
    new: &VirtualMachineInstance,
) -> Vec<Finding> {
    let Some(node) = capabilities.node_identity() else {
        return Vec::new();
    };

    let mut findings = Vec::new();
    let hosted_here = old.status.node_name.as_deref() == Some(node);
    if !hosted_here && target_node(old) != Some(node) {
        findings.push(Finding::forbidden(
            &FieldPath::root(),
            format!("node {node} may only modify instances it hosts or receives by migration"),
        ));
    }

    if target_node(old) != target_node(new) {
        findings.push(Finding::forbidden(
            &FieldPath::from_children(&["status", "migrationState", "targetNode"]),
            format!("node {node} may not set the migration target"),
        ));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use virt_types::vmi::MigrationState;

    fn hosted_on(node: &str) -> VirtualMachineInstance {
        let mut vmi = VirtualMachineInstance::new("vmi", "default", Default::default());
        vmi.status.node_name = Some(node.into());
        vmi
    }

    #[test]
    fn test_unrestricted_actor() {
        let old = hosted_on("node01");
        assert!(check_node_restriction(&CapabilitySet::privileged(), &old, &old.clone()).is_empty());
    }

    #[test]
    fn test_agent_on_host_node() {
        let old = hosted_on("node01");
        let agent = CapabilitySet::node_agent("node01");
        assert!(check_node_restriction(&agent, &old, &old.clone()).is_empty());

        let other = CapabilitySet::node_agent("node02");
        let findings = check_node_restriction(&other, &old, &old.clone());
        assert_eq!(findings.len(), 1);
        assert!(findings[0].field.is_root());
    }

    #[test]
    fn test_agent_on_migration_target() {
        let mut old = hosted_on("node01");
        old.status.migration_state = Some(MigrationState {
            source_node: "node01".into(),
            target_node: "node02".into(),
            ..Default::default()
        });
        let agent = CapabilitySet::node_agent("node02");
        assert!(check_node_restriction(&agent, &old, &old.clone()).is_empty());
    }

    #[test]
    fn test_agent_may_not_choose_target() {
        let old = hosted_on("node01");
        let mut new = old.clone();
        new.status.migration_state = Some(MigrationState {
            target_node: "node03".into(),
            ..Default::default()
        });

        let findings = check_node_restriction(&CapabilitySet::node_agent("node01"), &old, &new);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field.to_string(), "status.migrationState.targetNode");
    }
}
