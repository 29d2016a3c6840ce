//! Field locators
//!
//! A [`FieldPath`] names a location inside an object, such as
//! `spec.domain.devices.disks[1].name`. Paths are immutable; appending
//! returns a new path and leaves the original untouched.

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Child(String),
    Index(usize),
    Key(String),
}

/// Path to a field, rendered with `.` between children and `[i]` for indices
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The empty root path
    pub fn root() -> Self {
        Self::default()
    }

    /// A path with a single child
    pub fn new(name: impl Into<String>) -> Self {
        Self::root().child(name)
    }

    /// Path starting with several children, e.g. `["spec", "template"]`
    pub fn from_children(names: &[&str]) -> Self {
        Self::root().children(names)
    }

    /// Append a child
    pub fn child(&self, name: impl Into<String>) -> Self {
        self.push(Segment::Child(name.into()))
    }

    /// Append several children
    pub fn children(&self, names: &[&str]) -> Self {
        let mut path = self.clone();
        path.segments
            .extend(names.iter().map(|n| Segment::Child((*n).to_string())));
        path
    }

    /// Append an index
    pub fn index(&self, index: usize) -> Self {
        self.push(Segment::Index(index))
    }

    /// Append a map key
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.push(Segment::Key(key.into()))
    }

    /// Whether the path is empty
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    fn push(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend_from_slice(&self.segments);
        segments.push(segment);
        Self { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Child(name) if i == 0 => f.write_str(name)?,
                Segment::Child(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_render_nested_path() {
        let path = FieldPath::new("spec")
            .children(&["domain", "devices", "disks"])
            .index(1)
            .child("name");
        assert_eq!(path.to_string(), "spec.domain.devices.disks[1].name");
    }

    #[test]
    fn test_root_renders_first_child_bare() {
        let path = FieldPath::root().children(&["domain", "cpu", "sockets"]);
        assert_eq!(path.to_string(), "domain.cpu.sockets");
        assert_eq!(FieldPath::root().to_string(), "");
        assert!(FieldPath::root().is_root());
    }

    #[test]
    fn test_append_does_not_mutate() {
        let base = FieldPath::new("metadata");
        let labels = base.child("labels").key("kubevirt.io/nodeName");
        assert_eq!(base.to_string(), "metadata");
        assert_eq!(labels.to_string(), "metadata.labels[kubevirt.io/nodeName]");
    }

    #[test]
    fn test_serializes_as_string() {
        let path = FieldPath::new("spec").child("volumes").index(0);
        assert_eq!(serde_json::to_value(&path).unwrap(), "spec.volumes[0]");
    }

    proptest! {
        #[test]
        fn property_children_join_with_dots(names in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let path = FieldPath::from_children(&refs);
            prop_assert_eq!(path.to_string(), names.join("."));
        }
    }
}
