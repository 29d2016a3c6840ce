//! Structural diff over JSON trees
//!
//! Specs are compared as generic [`serde_json::Value`] trees. An absent key
//! and an explicit `null` are the same thing. Objects are descended key by
//! key, so a difference always names the deepest differing member. Arrays
//! of equal length are compared element-wise; arrays whose length changed
//! are reported as a whole.

use crate::field::FieldPath;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// One step into a JSON tree
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Location of one difference
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiffPath(Vec<Segment>);

impl DiffPath {
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Whether the path lies at or below the given object keys
    pub fn starts_with(&self, keys: &[&str]) -> bool {
        keys.len() <= self.0.len()
            && keys
                .iter()
                .zip(&self.0)
                .all(|(key, segment)| matches!(segment, Segment::Key(k) if k == key))
    }

    /// Render below `root`
    pub fn to_field(&self, root: &FieldPath) -> FieldPath {
        self.0.iter().fold(root.clone(), |path, segment| match segment {
            Segment::Key(key) => path.child(key.as_str()),
            Segment::Index(i) => path.index(*i),
        })
    }

    fn push(&self, segment: Segment) -> Self {
        let mut next = self.0.clone();
        next.push(segment);
        Self(next)
    }
}

impl fmt::Display for DiffPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_field(&FieldPath::root()))
    }
}

/// Paths at which `old` and `new` differ, in tree order
pub fn diff(old: &Value, new: &Value) -> Vec<DiffPath> {
    let mut out = Vec::new();
    walk(&DiffPath::default(), old, new, &mut out);
    out
}

fn walk(path: &DiffPath, old: &Value, new: &Value, out: &mut Vec<DiffPath>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                let left = a.get(key).unwrap_or(&Value::Null);
                let right = b.get(key).unwrap_or(&Value::Null);
                walk(&path.push(Segment::Key(key.clone())), left, right, out);
            }
        }
        // Appearing or disappearing objects report their leaves
        (Value::Object(_), Value::Null) | (Value::Null, Value::Object(_)) => {
            let empty = Value::Object(Default::default());
            let (left, right) = if old.is_null() { (&empty, new) } else { (old, &empty) };
            walk(path, left, right, out);
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (i, (left, right)) in a.iter().zip(b).enumerate() {
                walk(&path.push(Segment::Index(i)), left, right, out);
            }
        }
        _ if old == new => {}
        _ => out.push(path.clone()),
    }
}
