//! Admission dispatcher
//!
//! The dispatcher maps a request's resource kind and operation to the first
//! registered [`Admitter`] that accepts it, runs it with a context resolved
//! once per request, and renders the verdict into an [`AdmissionResponse`].
//!
//! ## Admitters
//!
//! - [`VmiAdmitter`]: instance create, update and delete
//! - [`VmAdmitter`]: virtual machine create and update
//! - [`MigrationAdmitter`]: migration create and update
//! - [`EvictionAdmitter`]: pod evictions that turn into evacuations
//!
//! Structural errors and validation rejections leave the dispatcher in the
//! same envelope. Every admission is logged as an [`AdmissionRecord`].

pub mod eviction;
pub mod migration;
pub mod vm;
pub mod vmi;

pub use eviction::EvictionAdmitter;
pub use migration::MigrationAdmitter;
pub use vm::VmAdmitter;
pub use vmi::VmiAdmitter;

use crate::context::{AdmissionContext, CapabilityResolver};
use crate::engine::ValidationEngine;
use crate::envelope::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation, ResourceKind};
use crate::error::{AdmissionError, Result};
use crate::finding::ValidationOutcome;
use crate::labels::LabelGuard;
use crate::lookup::{ConfigSource, ResourceLookup};
use crate::mutability::{MutabilityController, VolumeHotplugPolicy};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use virt_types::ClusterConfig;

/// What an admitter decided
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Findings and warnings from validation; allowed when there are no findings
    Validated(ValidationOutcome),

    /// Explicit denial with a status code
    Denied { code: u16, message: String },
}

impl Verdict {
    /// Allow with no findings
    pub fn allow() -> Self {
        Self::Validated(ValidationOutcome::default())
    }

    pub fn denied(code: u16, message: impl Into<String>) -> Self {
        Self::Denied {
            code,
            message: message.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        match self {
            Self::Validated(outcome) => outcome.is_allowed(),
            Self::Denied { .. } => false,
        }
    }

    /// Number of findings behind the verdict
    pub fn finding_count(&self) -> usize {
        match self {
            Self::Validated(outcome) => outcome.findings.len(),
            Self::Denied { .. } => 0,
        }
    }

    /// Render the verdict for the request `uid`
    pub fn into_response(self, uid: &str) -> AdmissionResponse {
        match self {
            Self::Validated(outcome) if outcome.is_allowed() => AdmissionResponse::allowed(uid, outcome.warnings),
            Self::Validated(outcome) => AdmissionResponse::rejected(uid, &outcome.findings),
            Self::Denied { code, message } => AdmissionResponse::denied(uid, code, message),
        }
    }
}

impl From<ValidationOutcome> for Verdict {
    fn from(outcome: ValidationOutcome) -> Self {
        Self::Validated(outcome)
    }
}

/// Handles admission of one or more resource kinds
#[async_trait]
pub trait Admitter: Send + Sync + Debug {
    /// Stable identifier
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Whether this admitter handles the kind and operation
    fn applies_to(&self, kind: &ResourceKind, operation: Operation) -> bool;

    /// Judge a request
    async fn admit(
        &self,
        request: &AdmissionRequest,
        ctx: &AdmissionContext,
        config: &ClusterConfig,
    ) -> Result<Verdict>;
}

/// Audit record of one admission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionRecord {
    pub request_id: String,
    pub kind: ResourceKind,
    pub operation: Operation,
    pub actor: String,
    /// Admitter that handled the request, if one did
    pub admitter: Option<String>,
    pub allowed: bool,
    pub findings: usize,
    pub duration_us: u64,
}

/// Routes requests to admitters
#[derive(Debug)]
pub struct AdmissionDispatcher {
    /// Registered admitters, first match wins
    admitters: Arc<RwLock<Vec<Arc<dyn Admitter>>>>,

    /// Resolves capabilities once per request
    resolver: Arc<dyn CapabilityResolver>,

    /// Cluster configuration, snapshotted once per request
    config: Arc<dyn ConfigSource>,

    /// Whether to log admission records
    emit_records: bool,
}

impl AdmissionDispatcher {
    /// Dispatcher with no admitters
    pub fn new(resolver: Arc<dyn CapabilityResolver>, config: Arc<dyn ConfigSource>) -> Self {
        Self::with_admitters(resolver, config, Vec::new())
    }

    /// Dispatcher over the given admitters
    pub fn with_admitters(
        resolver: Arc<dyn CapabilityResolver>,
        config: Arc<dyn ConfigSource>,
        admitters: Vec<Arc<dyn Admitter>>,
    ) -> Self {
        Self {
            admitters: Arc::new(RwLock::new(admitters)),
            resolver,
            config,
            emit_records: true,
        }
    }

    /// Set whether to log admission records
    pub fn with_emit_records(mut self, emit: bool) -> Self {
        self.emit_records = emit;
        self
    }

    /// Add an admitter after the existing ones
    pub async fn register(&self, admitter: Arc<dyn Admitter>) {
        let mut admitters = self.admitters.write().await;
        admitters.push(admitter);
    }

    /// Remove an admitter by ID
    pub async fn remove(&self, admitter_id: &str) -> bool {
        let mut admitters = self.admitters.write().await;
        let len_before = admitters.len();
        admitters.retain(|a| a.id() != admitter_id);
        admitters.len() < len_before
    }

    /// List all admitter IDs
    pub async fn list_admitters(&self) -> Vec<String> {
        let admitters = self.admitters.read().await;
        admitters.iter().map(|a| a.id().to_string()).collect()
    }

    pub async fn admitter_count(&self) -> usize {
        self.admitters.read().await.len()
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<ClusterConfig> {
        self.config.get_config()
    }

    /// Handle a wire review and answer with a wire review
    pub async fn review(&self, review: AdmissionReview) -> AdmissionReview {
        let uid = review.request.as_ref().map(|r| r.uid.clone()).unwrap_or_default();
        match AdmissionRequest::from_review(&review) {
            Ok(request) => AdmissionReview::response(self.dispatch(&request).await),
            Err(err) => {
                warn!(uid = %uid, error = %err, "Rejected malformed admission review");
                AdmissionReview::response(AdmissionResponse::error(uid, &err))
            }
        }
    }

    /// Admit a decoded request
    pub async fn dispatch(&self, request: &AdmissionRequest) -> AdmissionResponse {
        self.dispatch_with_record(request).await.0
    }

    /// Admit a decoded request and return its audit record
    pub async fn dispatch_with_record(&self, request: &AdmissionRequest) -> (AdmissionResponse, AdmissionRecord) {
        let started = Instant::now();
        let ctx = AdmissionContext::resolved(request.user_info.clone(), self.resolver.as_ref())
            .with_request_id(request.uid.clone())
            .with_dry_run(request.dry_run);
        let config = self.config.get_config();

        debug!(
            request_id = %ctx.request_id,
            kind = ?request.kind,
            operation = %request.operation,
            actor = %ctx.actor(),
            "Dispatching admission request"
        );

        let admitter = self.select(&request.kind, request.operation).await;
        let result = match &admitter {
            Some(admitter) => admitter.admit(request, &ctx, &config).await,
            None => Err(AdmissionError::NoAdmitter {
                kind: request.kind.to_string(),
                operation: request.operation.to_string(),
            }),
        };

        let (response, findings) = match result {
            Ok(verdict) => {
                let findings = verdict.finding_count();
                (verdict.into_response(&request.uid), findings)
            }
            Err(err) => (AdmissionResponse::error(&request.uid, &err), 0),
        };

        let record = AdmissionRecord {
            request_id: ctx.request_id.clone(),
            kind: request.kind.clone(),
            operation: request.operation,
            actor: ctx.actor().to_string(),
            admitter: admitter.map(|a| a.id().to_string()),
            allowed: response.allowed,
            findings,
            duration_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        };
        if self.emit_records {
            log_record(&record, &response);
        }
        (response, record)
    }

    async fn select(&self, kind: &ResourceKind, operation: Operation) -> Option<Arc<dyn Admitter>> {
        let admitters = self.admitters.read().await;
        admitters
            .iter()
            .find(|a| a.applies_to(kind, operation))
            .map(Arc::clone)
    }
}

fn log_record(record: &AdmissionRecord, response: &AdmissionResponse) {
    if record.allowed {
        info!(
            request_id = %record.request_id,
            kind = ?record.kind,
            operation = %record.operation,
            actor = %record.actor,
            warnings = response.warnings.len(),
            duration_us = record.duration_us,
            "Admission allowed"
        );
    } else {
        let (code, message) = response
            .status
            .as_ref()
            .map(|s| (s.code, s.message.as_str()))
            .unwrap_or_default();
        warn!(
            request_id = %record.request_id,
            kind = ?record.kind,
            operation = %record.operation,
            actor = %record.actor,
            code = code,
            findings = record.findings,
            reason = %message,
            duration_us = record.duration_us,
            "Admission rejected"
        );
    }
}

/// The built-in admitters, sharing one engine and lookup
pub fn builtin_admitters(
    engine: ValidationEngine,
    lookup: Arc<dyn ResourceLookup>,
    labels: LabelGuard,
) -> Vec<Arc<dyn Admitter>> {
    let storage = Arc::new(VolumeHotplugPolicy::new(Arc::clone(&lookup)));
    let controller = MutabilityController::new(engine.clone(), storage, labels);
    vec![
        Arc::new(VmiAdmitter::new(engine.clone(), controller)),
        Arc::new(VmAdmitter::new(engine.clone(), Arc::clone(&lookup))),
        Arc::new(MigrationAdmitter::new(engine, Arc::clone(&lookup))),
        Arc::new(EvictionAdmitter::new(lookup)),
    ]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::{AuthorizationConfig, IdentityCapabilityResolver, UserInfo};
    use crate::engine::tests::valid_spec;
    use crate::envelope::{AdmissionReviewRequest, GroupVersionResource, CODE_BAD_REQUEST, CODE_INVALID};
    use crate::lookup::{InMemoryLookup, StaticConfigSource};
    use virt_types::{Cpu, Quantity, VirtualMachineInstance};

    pub(crate) const CONTROLLER: &str = "system:serviceaccount:kubevirt:kubevirt-controller";

    pub(crate) fn dispatcher_with(lookup: Arc<InMemoryLookup>, config: ClusterConfig) -> AdmissionDispatcher {
        let auth = AuthorizationConfig::default();
        AdmissionDispatcher::with_admitters(
            Arc::new(IdentityCapabilityResolver::new(auth.clone())),
            Arc::new(StaticConfigSource::new(config)),
            builtin_admitters(ValidationEngine::new().unwrap(), lookup, LabelGuard::from_config(&auth)),
        )
        .with_emit_records(false)
    }

    fn dispatcher() -> AdmissionDispatcher {
        dispatcher_with(Arc::new(InMemoryLookup::new()), ClusterConfig::default())
    }

    fn vmi() -> VirtualMachineInstance {
        VirtualMachineInstance::new("testvmi", "default", valid_spec())
    }

    #[derive(Debug)]
    struct DenyAll;

    #[async_trait]
    impl Admitter for DenyAll {
        fn id(&self) -> &str {
            "deny-all"
        }

        fn name(&self) -> &str {
            "Deny All"
        }

        fn applies_to(&self, _: &ResourceKind, _: Operation) -> bool {
            true
        }

        async fn admit(&self, _: &AdmissionRequest, _: &AdmissionContext, _: &ClusterConfig) -> Result<Verdict> {
            Ok(Verdict::denied(403, "denied"))
        }
    }

    #[tokio::test]
    async fn test_builtin_registry() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.admitter_count().await, 4);
        assert_eq!(
            dispatcher.list_admitters().await,
            vec!["vmi", "vm", "migration", "eviction"]
        );
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let dispatcher = AdmissionDispatcher::new(
            Arc::new(IdentityCapabilityResolver::default()),
            Arc::new(StaticConfigSource::default()),
        )
        .with_emit_records(false);
        assert_eq!(dispatcher.admitter_count().await, 0);

        dispatcher.register(Arc::new(DenyAll)).await;
        let request = AdmissionRequest::new(ResourceKind::Other("pods".into()), Operation::Create);
        let response = dispatcher.dispatch(&request).await;
        assert!(!response.allowed);
        assert_eq!(response.status.unwrap().code, 403);

        assert!(dispatcher.remove("deny-all").await);
        assert!(!dispatcher.remove("deny-all").await);
    }

    #[tokio::test]
    async fn test_no_admitter_is_structural_error() {
        let request = AdmissionRequest::new(ResourceKind::Other("pods".into()), Operation::Create);
        let (response, record) = dispatcher().dispatch_with_record(&request).await;
        assert!(!response.allowed);
        let status = response.status.unwrap();
        assert_eq!(status.code, CODE_BAD_REQUEST);
        assert!(status.details.is_none());
        assert!(record.admitter.is_none());
    }

    #[tokio::test]
    async fn test_valid_instance_allowed() {
        let request = AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Create)
            .with_object(&vmi())
            .with_user(UserInfo::new("alice"));
        let (response, record) = dispatcher().dispatch_with_record(&request).await;
        assert!(response.allowed, "{:?}", response.status);
        assert_eq!(response.uid, request.uid);
        assert_eq!(record.admitter.as_deref(), Some("vmi"));
        assert_eq!(record.actor, "alice");
        assert_eq!(record.findings, 0);
    }

    #[tokio::test]
    async fn test_negative_cpu_request_rejected() {
        let mut vmi = vmi();
        vmi.spec
            .domain
            .resources
            .requests
            .insert("cpu".into(), Quantity::parse("-200m").unwrap());
        let request = AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Create).with_object(&vmi);

        let (response, record) = dispatcher().dispatch_with_record(&request).await;
        assert!(!response.allowed);
        assert_eq!(record.findings, 1);
        assert_eq!(response.status.as_ref().unwrap().code, CODE_INVALID);
        assert_eq!(response.causes()[0].field, "spec.domain.resources.requests.cpu");
    }

    #[tokio::test]
    async fn test_max_sockets_update_rejected_for_controller() {
        let mut old = vmi();
        old.spec.domain.cpu = Some(Cpu {
            sockets: 8,
            max_sockets: 8,
            ..Default::default()
        });
        let mut new = old.clone();
        if let Some(cpu) = new.spec.domain.cpu.as_mut() {
            cpu.max_sockets = 4;
        }

        let request = AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Update)
            .with_object(&new)
            .with_old_object(&old)
            .with_user(UserInfo::new(CONTROLLER));
        let response = dispatcher().dispatch(&request).await;
        assert!(!response.allowed);
        assert_eq!(response.status.unwrap().code, CODE_INVALID);
    }

    #[tokio::test]
    async fn test_undecodable_object_is_structural_error() {
        let mut request = AdmissionRequest::new(ResourceKind::VirtualMachineInstance, Operation::Create);
        request.object = b"{not json".to_vec();
        let response = dispatcher().dispatch(&request).await;
        assert!(!response.allowed);
        let status = response.status.unwrap();
        assert_eq!(status.code, CODE_BAD_REQUEST);
        assert!(status.details.is_none());
    }

    #[tokio::test]
    async fn test_review_round_trip() {
        let review = AdmissionReview::request(AdmissionReviewRequest {
            uid: "req-1".into(),
            resource: GroupVersionResource::new("kubevirt.io", "v1", "virtualmachineinstances"),
            operation: Some(Operation::Create),
            object: Some(serde_json::to_value(vmi()).unwrap()),
            ..Default::default()
        });

        let answer = dispatcher().review(review).await;
        let response = answer.response.unwrap();
        assert_eq!(response.uid, "req-1");
        assert!(response.allowed);
        assert!(answer.request.is_none());
    }

    #[tokio::test]
    async fn test_vm_status_review_routed() {
        let vm = serde_json::json!({
            "metadata": {"name": "testvm", "namespace": "default"},
            "spec": {"runStrategy": "Always"},
            "status": {"ready": false},
        });
        let review = AdmissionReview::request(AdmissionReviewRequest {
            uid: "req-3".into(),
            resource: GroupVersionResource::new("kubevirt.io", "v1", "virtualmachines"),
            sub_resource: Some("status".into()),
            operation: Some(Operation::Update),
            object: Some(vm.clone()),
            old_object: Some(vm),
            ..Default::default()
        });
        let response = dispatcher().review(review).await.response.unwrap();
        assert!(response.allowed, "{:?}", response.status);
    }

    #[tokio::test]
    async fn test_review_without_operation() {
        let review = AdmissionReview::request(AdmissionReviewRequest {
            uid: "req-2".into(),
            ..Default::default()
        });
        let response = dispatcher().review(review).await.response.unwrap();
        assert_eq!(response.uid, "req-2");
        assert!(!response.allowed);
        assert_eq!(response.status.unwrap().code, CODE_BAD_REQUEST);
    }
}
