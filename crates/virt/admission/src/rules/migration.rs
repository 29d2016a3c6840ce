//! Migration request rules

use super::common::required_field_message;
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, MigrationSpec};

pub fn rules() -> Vec<Rule<MigrationSpec>> {
    vec![Rule::new("migration.vmi_name", 100, vmi_name)]
}

fn vmi_name(field: &FieldPath, spec: &MigrationSpec, _: &ClusterConfig) -> Vec<Finding> {
    if !spec.vmi_name.is_empty() {
        return Vec::new();
    }
    let path = field.child("vmiName");
    vec![Finding::required(&path, required_field_message(&path))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::FindingKind;

    #[test]
    fn test_vmi_name_required() {
        let findings = vmi_name(&FieldPath::new("spec"), &MigrationSpec::default(), &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Required);
        assert_eq!(findings[0].field.to_string(), "spec.vmiName");
        assert_eq!(findings[0].message, "spec.vmiName is a required field");

        let spec = MigrationSpec {
            vmi_name: "testvmi".into(),
        };
        assert!(vmi_name(&FieldPath::new("spec"), &spec, &ClusterConfig::default()).is_empty());
    }
}
