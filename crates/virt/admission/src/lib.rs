//! Virt Admission - validation core for virtual-machine workloads
//!
//! Decides whether a create or update of an instance, virtual machine or
//! migration is admitted, and why not. Every rejection carries a list of
//! findings, each with a kind, a message and the field it is about.
//!
//! ## Components
//!
//! - **Rules**: Pure checks grouped into ordered, gate-aware tables
//! - **ValidationEngine**: Runs the tables and gathers findings
//! - **MutabilityController**: Decides which updates a running instance accepts
//! - **LabelGuard**: Keeps reserved labels for privileged actors
//! - **AdmissionDispatcher**: Routes wire requests to admitters and renders responses
//!
//! ## Request Flow
//!
//! ```text
//! AdmissionReview ─► AdmissionDispatcher ─► Admitter ─► ValidationEngine
//!                          │                   │
//!                  CapabilityResolver    ResourceLookup
//! ```
//!
//! Capabilities and the cluster configuration are resolved once per request.
//! Rules never see who is asking; only admitters and the mutability
//! controller do.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod field;
pub mod finding;
pub mod labels;
pub mod lookup;
pub mod mutability;
pub mod rules;

// Re-export main types
pub use context::{
    AdmissionContext, AuthorizationConfig, Capability, CapabilityResolver, CapabilitySet,
    IdentityCapabilityResolver, UserInfo,
};
pub use dispatcher::{
    builtin_admitters, AdmissionDispatcher, AdmissionRecord, Admitter, EvictionAdmitter,
    MigrationAdmitter, Verdict, VmAdmitter, VmiAdmitter,
};
pub use engine::ValidationEngine;
pub use envelope::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, AdmissionReviewRequest,
    GroupVersionResource, Operation, ResourceKind,
};
pub use error::{AdmissionError, LookupError, LookupResult, Result, RuleError};
pub use field::FieldPath;
pub use finding::{Finding, FindingKind, ValidationOutcome};
pub use labels::LabelGuard;
pub use lookup::{ConfigSource, EvacuationPatch, InMemoryLookup, ResourceLookup, StaticConfigSource};
pub use mutability::{MutabilityController, MutationReview, StorageHotplugPolicy, VolumeHotplugPolicy};
pub use rules::{Rule, RuleRegistry, RuleTable};
