//! Object metadata annotations
//!
//! Reserved labels are guarded separately by [`crate::labels::LabelGuard`],
//! which needs to know who is asking.

use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, FeatureGate, ObjectMeta};

/// Ignition configuration passed to the guest
pub const IGNITION_ANNOTATION: &str = "kubevirt.io/ignitiondata";

/// Hook sidecars to run next to the guest
pub const SIDECAR_ANNOTATION: &str = "hooks.kubevirt.io/hookSidecars";

/// Parallel migration thread count
pub const MIGRATION_THREADS_ANNOTATION: &str = "kubevirt.io/multiThreadedQemuMigration";

pub fn rules() -> Vec<Rule<ObjectMeta>> {
    vec![
        Rule::new("metadata.ignition", 100, ignition).gated(FeatureGate::ExperimentalIgnitionSupport),
        Rule::new("metadata.sidecar", 110, sidecar).gated(FeatureGate::Sidecar),
        Rule::new("metadata.migration_threads", 120, migration_threads),
    ]
}

fn annotation_set<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn ignition(field: &FieldPath, meta: &ObjectMeta, _: &ClusterConfig) -> Vec<Finding> {
    if annotation_set(meta, IGNITION_ANNOTATION).is_none() {
        return Vec::new();
    }
    let annotations = field.child("annotations");
    vec![Finding::invalid(
        &annotations,
        format!(
            "{} feature gate is not enabled in kubevirt-config, invalid entry {}",
            FeatureGate::ExperimentalIgnitionSupport,
            annotations.key(IGNITION_ANNOTATION)
        ),
    )]
}

fn sidecar(field: &FieldPath, meta: &ObjectMeta, _: &ClusterConfig) -> Vec<Finding> {
    if annotation_set(meta, SIDECAR_ANNOTATION).is_none() {
        return Vec::new();
    }
    let annotations = field.child("annotations");
    vec![Finding::invalid(
        &annotations,
        format!(
            "sidecar feature gate is not enabled in kubevirt-config, invalid entry {}",
            annotations.key(SIDECAR_ANNOTATION)
        ),
    )]
}

fn migration_threads(field: &FieldPath, meta: &ObjectMeta, _: &ClusterConfig) -> Vec<Finding> {
    let Some(raw) = meta.annotations.get(MIGRATION_THREADS_ANNOTATION) else {
        return Vec::new();
    };
    let annotations = field.child("annotations");
    let entry = annotations.key(MIGRATION_THREADS_ANNOTATION);

    let message = match raw.parse::<i64>() {
        Err(e) => format!("cannot parse {raw} to int: {e}, invalid entry {entry}"),
        Ok(count) if count <= 1 => {
            format!("thread count ({raw}) must be larger than 1. invalid entry {entry}")
        }
        Ok(_) => return Vec::new(),
    };
    vec![Finding::invalid(&annotations, message)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(meta: &ObjectMeta, config: &ClusterConfig) -> Vec<Finding> {
        let table = crate::rules::RuleTable::with_rules("metadata", rules()).unwrap();
        table.evaluate(&FieldPath::new("metadata"), meta, config)
    }

    #[test]
    fn test_plain_metadata_passes() {
        let meta = ObjectMeta::new("vm", "default").with_annotation("team", "storage");
        assert!(check(&meta, &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_ignition_needs_gate() {
        let meta = ObjectMeta::new("vm", "default").with_annotation(IGNITION_ANNOTATION, "{}");
        let findings = check(&meta, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field.to_string(), "metadata.annotations");
        assert_eq!(
            findings[0].message,
            "ExperimentalIgnitionSupport feature gate is not enabled in kubevirt-config, invalid entry metadata.annotations[kubevirt.io/ignitiondata]"
        );

        let config = ClusterConfig::default().with_gate(FeatureGate::ExperimentalIgnitionSupport);
        assert!(check(&meta, &config).is_empty());
    }

    #[test]
    fn test_sidecar_needs_gate() {
        let meta = ObjectMeta::new("vm", "default").with_annotation(SIDECAR_ANNOTATION, "[]");
        assert_eq!(check(&meta, &ClusterConfig::default()).len(), 1);
        let config = ClusterConfig::default().with_gate(FeatureGate::Sidecar);
        assert!(check(&meta, &config).is_empty());
    }

    #[test]
    fn test_migration_thread_count() {
        let config = ClusterConfig::default();
        let bad = ObjectMeta::default().with_annotation(MIGRATION_THREADS_ANNOTATION, "many");
        let findings = check(&bad, &config);
        assert!(findings[0].message.starts_with("cannot parse many to int: invalid digit found in string"));

        let one = ObjectMeta::default().with_annotation(MIGRATION_THREADS_ANNOTATION, "1");
        assert_eq!(
            check(&one, &config)[0].message,
            "thread count (1) must be larger than 1. invalid entry metadata.annotations[kubevirt.io/multiThreadedQemuMigration]"
        );

        let four = ObjectMeta::default().with_annotation(MIGRATION_THREADS_ANNOTATION, "4");
        assert!(check(&four, &config).is_empty());
    }
}
