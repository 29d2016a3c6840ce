//! Hotplug allow-list
//!
//! A running instance keeps its spec except for a few subtrees that can be
//! changed in place. Every difference between the old and new spec is
//! matched against [`HOTPLUG_PATHS`]; a difference anywhere else rejects the
//! whole update.

use super::diff::{diff, DiffPath};
use crate::field::FieldPath;
use crate::finding::Finding;
use serde::Serialize;
use std::collections::BTreeSet;
use virt_types::{Cpu, Memory, VirtualMachineInstanceSpec};

/// A subtree of the spec that may change on a running instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Subtree {
    /// Socket count within the configured maximum
    CpuTopology,
    /// Guest memory within the configured maximum
    Memory,
    /// Volumes, disks and filesystems
    Storage,
}

/// Classification of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiffClass {
    Identical,
    ChangedAllowed,
    ChangedRejected,
}

/// An allow-listed path and the subtree it belongs to
#[derive(Debug, Clone, Copy)]
pub struct AllowedPath {
    pub keys: &'static [&'static str],
    pub subtree: Subtree,
}

/// Paths that may differ between the old and new spec
pub const HOTPLUG_PATHS: &[AllowedPath] = &[
    AllowedPath {
        keys: &["domain", "cpu", "sockets"],
        subtree: Subtree::CpuTopology,
    },
    AllowedPath {
        keys: &["domain", "cpu", "maxSockets"],
        subtree: Subtree::CpuTopology,
    },
    AllowedPath {
        keys: &["domain", "memory", "guest"],
        subtree: Subtree::Memory,
    },
    AllowedPath {
        keys: &["domain", "memory", "maxGuest"],
        subtree: Subtree::Memory,
    },
    AllowedPath {
        keys: &["volumes"],
        subtree: Subtree::Storage,
    },
    AllowedPath {
        keys: &["domain", "devices", "disks"],
        subtree: Subtree::Storage,
    },
    AllowedPath {
        keys: &["domain", "devices", "filesystems"],
        subtree: Subtree::Storage,
    },
];

/// Verdict for one changed subtree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtreeDiff {
    pub subtree: Subtree,
    pub class: DiffClass,
    pub findings: Vec<Finding>,
}

/// Classification of a whole spec update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationDiff {
    pub class: DiffClass,

    /// Changed allow-listed subtrees, in [`Subtree`] order
    pub subtrees: Vec<SubtreeDiff>,

    /// Changed paths outside the allow-list
    pub outside: Vec<FieldPath>,
}

impl MutationDiff {
    /// No differences
    pub fn identical() -> Self {
        Self {
            class: DiffClass::Identical,
            subtrees: Vec::new(),
            outside: Vec::new(),
        }
    }

    pub fn is_identical(&self) -> bool {
        self.class == DiffClass::Identical
    }

    pub fn is_allowed(&self) -> bool {
        self.class != DiffClass::ChangedRejected
    }

    /// Whether the subtree changed
    pub fn touches(&self, subtree: Subtree) -> bool {
        self.subtrees.iter().any(|s| s.subtree == subtree)
    }

    /// Record the verdict of an external check on a changed subtree
    pub fn resolve(&mut self, subtree: Subtree, findings: Vec<Finding>) {
        if let Some(entry) = self.subtrees.iter_mut().find(|s| s.subtree == subtree) {
            if !findings.is_empty() {
                entry.class = DiffClass::ChangedRejected;
            }
            entry.findings.extend(findings);
        }
        self.reclassify();
    }

    /// Every finding explaining a rejection
    pub fn findings(&self) -> Vec<Finding> {
        let outside = self
            .outside
            .iter()
            .map(|path| Finding::forbidden(path, "field cannot be changed on a running VirtualMachineInstance"));
        outside
            .chain(self.subtrees.iter().flat_map(|s| s.findings.iter().cloned()))
            .collect()
    }

    fn reclassify(&mut self) {
        self.class = if self.subtrees.is_empty() && self.outside.is_empty() {
            DiffClass::Identical
        } else if !self.outside.is_empty() || self.subtrees.iter().any(|s| s.class == DiffClass::ChangedRejected) {
            DiffClass::ChangedRejected
        } else {
            DiffClass::ChangedAllowed
        };
    }
}

/// Subtree an allow-listed path belongs to
pub fn subtree_of(path: &DiffPath) -> Option<Subtree> {
    HOTPLUG_PATHS
        .iter()
        .find(|allowed| path.starts_with(allowed.keys))
        .map(|allowed| allowed.subtree)
}

/// Classify the update of `old` into `new`, both rooted at `root`
///
/// CPU and memory subtrees are judged here. Storage changes are left
/// `ChangedAllowed` for the storage hotplug policy to [`MutationDiff::resolve`].
pub fn classify(root: &FieldPath, old: &VirtualMachineInstanceSpec, new: &VirtualMachineInstanceSpec) -> MutationDiff {
    let (old_tree, new_tree) = match (serde_json::to_value(old), serde_json::to_value(new)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(err), _) | (_, Err(err)) => {
            let mut rejected = MutationDiff::identical();
            rejected.subtrees.push(SubtreeDiff {
                subtree: Subtree::Storage,
                class: DiffClass::ChangedRejected,
                findings: vec![Finding::server_error(root, format!("could not compare specs: {err}"))],
            });
            rejected.reclassify();
            return rejected;
        }
    };

    let mut touched = BTreeSet::new();
    let mut outside = Vec::new();
    for path in diff(&old_tree, &new_tree) {
        match subtree_of(&path) {
            Some(subtree) => {
                touched.insert(subtree);
            }
            None => outside.push(path.to_field(root)),
        }
    }

    let cpu_root = root.children(&["domain", "cpu"]);
    let memory_root = root.children(&["domain", "memory"]);
    let subtrees = touched
        .into_iter()
        .map(|subtree| {
            let findings = match subtree {
                Subtree::CpuTopology => check_cpu_topology(
                    &cpu_root,
                    old.domain.cpu.as_ref(),
                    new.domain.cpu.as_ref(),
                ),
                Subtree::Memory => check_memory(
                    &memory_root,
                    old.domain.memory.as_ref(),
                    new.domain.memory.as_ref(),
                ),
                Subtree::Storage => Vec::new(),
            };
            let class = if findings.is_empty() {
                DiffClass::ChangedAllowed
            } else {
                DiffClass::ChangedRejected
            };
            SubtreeDiff { subtree, class, findings }
        })
        .collect();

    let mut result = MutationDiff {
        class: DiffClass::Identical,
        subtrees,
        outside,
    };
    result.reclassify();
    result
}

/// Socket hotplug: the maximum is fixed, the count moves within it
///
/// Without a maximum the socket count is fixed too.
pub fn check_cpu_topology(field: &FieldPath, old: Option<&Cpu>, new: Option<&Cpu>) -> Vec<Finding> {
    let old_max = old.map_or(0, |cpu| cpu.max_sockets);
    let old_sockets = old.map_or(0, |cpu| cpu.sockets);
    let Some(new) = new else {
        return Vec::new();
    };

    let mut findings = Vec::new();
    if new.max_sockets != old_max {
        findings.push(Finding::forbidden(
            &field.child("maxSockets"),
            "maxSockets cannot be changed on a running VirtualMachineInstance",
        ));
    }
    if new.sockets < 1 {
        findings.push(Finding::invalid(
            &field.child("sockets"),
            "Number of sockets in CPU topology must be at least 1",
        ));
    } else if new.max_sockets == 0 && new.sockets != old_sockets {
        findings.push(Finding::forbidden(
            &field.child("sockets"),
            "Number of sockets cannot be changed on a running VirtualMachineInstance without maxSockets",
        ));
    } else if new.max_sockets > 0 && new.sockets > new.max_sockets {
        findings.push(Finding::invalid(
            &field.child("sockets"),
            "Number of sockets in CPU topology is greater than the maximum sockets allowed",
        ));
    }
    findings
}

/// Memory hotplug: a configured maximum is fixed, guest memory stays below it
pub fn check_memory(field: &FieldPath, old: Option<&Memory>, new: Option<&Memory>) -> Vec<Finding> {
    let old_max = old.and_then(|m| m.max_guest.as_ref());
    let new_max = new.and_then(|m| m.max_guest.as_ref());

    let mut findings = Vec::new();
    if old_max.is_some() && old_max != new_max {
        findings.push(Finding::forbidden(
            &field.child("maxGuest"),
            "maxGuest cannot be changed once set",
        ));
    }

    let guest = new.and_then(|m| m.guest.as_ref());
    if let (Some(guest), Some(max)) = (guest, new_max) {
        if guest > max {
            findings.push(Finding::invalid(
                &field.child("guest"),
                "Guest memory is greater than the configured maxGuest memory",
            ));
        }
    }
    findings
}
