//! Reserved label guard
//!
//! Some labels are written only by the platform itself: they record which
//! controller created an object, which node runs it, or where it migrates.
//! The [`LabelGuard`] rejects attempts by ordinary actors to set or change
//! them.
//!
//! ## Matching
//!
//! A key is reserved when it is one of the configured keys. On create, a
//! configured prefix additionally reserves every key under it. Updates only
//! report keys that are newly present or whose value changed, so objects that
//! already carry reserved labels can still be edited.

use crate::context::AuthorizationConfig;
use crate::field::FieldPath;
use crate::finding::Finding;
use std::collections::{BTreeMap, BTreeSet};

/// Labels only privileged actors may set
pub const RESTRICTED_LABELS: &[&str] = &[
    "kubevirt.io/created-by",
    "kubevirt.io/migrationJobUID",
    "kubevirt.io/nodeName",
    "kubevirt.io/migrationTargetNodeName",
    "kubevirt.io/schedulable",
    "kubevirt.io/install-strategy",
];

/// Namespace of platform labels
pub const RESERVED_PREFIX: &str = "kubevirt.io/";

const CREATE_MESSAGE: &str = "creation of the following reserved kubevirt.io/ labels on a VMI object is prohibited";
const UPDATE_MESSAGE: &str = "modification of the following reserved kubevirt.io/ labels on a VMI object is prohibited";

/// Set-membership test over reserved label keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGuard {
    reserved: BTreeSet<String>,
    prefix: Option<String>,
}

impl LabelGuard {
    /// Guard over the given exact keys
    pub fn new<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reserved: reserved.into_iter().map(Into::into).collect(),
            prefix: None,
        }
    }

    /// Also reserve every key under `prefix` on create
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Guard configured from the authorization section
    pub fn from_config(config: &AuthorizationConfig) -> Self {
        Self::new(config.reserved_labels.iter().cloned()).with_prefix(config.reserved_prefix.clone())
    }

    /// Whether the key is one of the exact reserved keys
    pub fn is_reserved(&self, key: &str) -> bool {
        self.reserved.contains(key)
    }

    fn is_reserved_on_create(&self, key: &str) -> bool {
        self.is_reserved(key)
            || self
                .prefix
                .as_deref()
                .is_some_and(|prefix| key.starts_with(prefix))
    }

    /// Reserved keys present in `labels`, as seen on create
    pub fn reserved_keys<'a>(&self, labels: &'a BTreeMap<String, String>) -> Vec<&'a str> {
        labels
            .keys()
            .map(String::as_str)
            .filter(|key| self.is_reserved_on_create(key))
            .collect()
    }

    /// Reserved keys newly present or changed between `old` and `new`
    pub fn changed_keys<'a>(
        &self,
        old: &BTreeMap<String, String>,
        new: &'a BTreeMap<String, String>,
    ) -> Vec<&'a str> {
        new.iter()
            .filter(|(key, value)| self.is_reserved(key) && old.get(*key) != Some(*value))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Check labels of a new object under `metadata`
    pub fn check(&self, labels: &BTreeMap<String, String>, is_privileged: bool) -> Vec<Finding> {
        self.check_at(&FieldPath::new("metadata"), labels, is_privileged)
    }

    /// Check labels of a new object under the given metadata path
    pub fn check_at(&self, metadata: &FieldPath, labels: &BTreeMap<String, String>, is_privileged: bool) -> Vec<Finding> {
        if is_privileged || self.reserved_keys(labels).is_empty() {
            return Vec::new();
        }
        vec![Finding::not_supported(&metadata.child("labels"), CREATE_MESSAGE)]
    }

    /// Check a label update under `metadata`
    pub fn check_update(
        &self,
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
        is_privileged: bool,
    ) -> Vec<Finding> {
        if is_privileged || self.changed_keys(old, new).is_empty() {
            return Vec::new();
        }
        vec![Finding::not_supported(
            &FieldPath::from_children(&["metadata", "labels"]),
            UPDATE_MESSAGE,
        )]
    }
}

impl Default for LabelGuard {
    fn default() -> Self {
        Self::new(RESTRICTED_LABELS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::FindingKind;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_restricted_label_rejected_for_plain_actor() {
        let guard = LabelGuard::default();
        let findings = guard.check(&labels(&[("kubevirt.io/nodeName", "node01")]), false);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::NotSupported);
        assert_eq!(findings[0].field.to_string(), "metadata.labels");
        assert_eq!(findings[0].message, CREATE_MESSAGE);
    }

    #[test]
    fn test_privileged_actor_may_set_restricted_labels() {
        let guard = LabelGuard::default();
        assert!(guard
            .check(&labels(&[("kubevirt.io/nodeName", "node01")]), true)
            .is_empty());
    }

    #[test]
    fn test_unrestricted_platform_label_allowed_by_default() {
        let guard = LabelGuard::default();
        assert!(guard.check(&labels(&[("kubevirt.io/l", "v")]), false).is_empty());

        let strict = LabelGuard::default().with_prefix(RESERVED_PREFIX);
        assert_eq!(strict.check(&labels(&[("kubevirt.io/l", "v")]), false).len(), 1);
        assert!(strict.check(&labels(&[("app", "web")]), false).is_empty());
    }

    #[test]
    fn test_update_reports_only_new_or_changed_keys() {
        let guard = LabelGuard::default();
        let old = labels(&[("kubevirt.io/nodeName", "node01"), ("app", "web")]);

        let unchanged_reserved = labels(&[("kubevirt.io/nodeName", "node01"), ("app", "db")]);
        assert!(guard.check_update(&old, &unchanged_reserved, false).is_empty());

        let moved = labels(&[("kubevirt.io/nodeName", "node02"), ("app", "web")]);
        assert_eq!(guard.changed_keys(&old, &moved), ["kubevirt.io/nodeName"]);
        let findings = guard.check_update(&old, &moved, false);
        assert_eq!(findings[0].message, UPDATE_MESSAGE);

        let added = labels(&[("kubevirt.io/nodeName", "node01"), ("kubevirt.io/created-by", "x")]);
        assert_eq!(guard.changed_keys(&old, &added), ["kubevirt.io/created-by"]);
        assert!(guard.check_update(&old, &added, true).is_empty());
    }

    #[test]
    fn test_removing_reserved_label_is_not_a_change() {
        let guard = LabelGuard::default();
        let old = labels(&[("kubevirt.io/nodeName", "node01")]);
        assert!(guard.check_update(&old, &BTreeMap::new(), false).is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = AuthorizationConfig {
            reserved_labels: vec!["example.com/owner".into()],
            reserved_prefix: String::new(),
            ..Default::default()
        };
        let guard = LabelGuard::from_config(&config);
        assert!(guard.is_reserved("example.com/owner"));
        assert!(!guard.is_reserved("kubevirt.io/nodeName"));
    }
}
