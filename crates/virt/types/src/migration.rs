//! Migration and eviction requests

use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Phases after which a migration no longer runs
pub const FINAL_MIGRATION_PHASES: &[&str] = &["Succeeded", "Failed"];

/// A request to live migrate an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMachineInstanceMigration {
    pub metadata: ObjectMeta,
    pub spec: MigrationSpec,
    pub status: MigrationStatus,
}

impl VirtualMachineInstanceMigration {
    /// Migration of the named instance
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, vmi_name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(name, namespace),
            spec: MigrationSpec {
                vmi_name: vmi_name.into(),
            },
            status: MigrationStatus::default(),
        }
    }

    /// Whether the migration has finished, successfully or not
    pub fn is_final(&self) -> bool {
        self.status
            .phase
            .as_deref()
            .is_some_and(|phase| FINAL_MIGRATION_PHASES.contains(&phase))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationSpec {
    /// Name of the instance to migrate
    pub vmi_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Eviction of the pod hosting an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Eviction {
    pub metadata: ObjectMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_phases() {
        let mut migration = VirtualMachineInstanceMigration::new("mig", "default", "vmi");
        assert!(!migration.is_final());
        migration.status.phase = Some("Running".into());
        assert!(!migration.is_final());
        migration.status.phase = Some("Failed".into());
        assert!(migration.is_final());
    }
}
