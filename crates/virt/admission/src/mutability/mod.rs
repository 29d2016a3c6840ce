//! Mutability of running instances
//!
//! Updates move through two states. By default a spec is **immutable** and
//! any difference rejects. Actors that may mutate specs reach the
//! **hotplug subset**: differences are diffed as JSON trees, matched against
//! an allow-list, and each changed subtree is judged on its own.
//!
//! ## Components
//!
//! - [`diff`]: structural diff with null treated as absent
//! - [`policy`]: the allow-list and the CPU and memory checks
//! - [`hotplug`]: the storage hotplug policy
//! - [`node`]: restrictions on node agents
//! - [`controller`]: ties the above together and re-validates the result

pub mod controller;
pub mod diff;
pub mod hotplug;
pub mod node;
pub mod policy;

pub use controller::{MutabilityController, MutationReview};
pub use diff::{diff, DiffPath, Segment};
pub use hotplug::{StorageHotplugPolicy, VolumeHotplugPolicy};
pub use node::check_node_restriction;
pub use policy::{classify, DiffClass, MutationDiff, Subtree, SubtreeDiff, HOTPLUG_PATHS};
