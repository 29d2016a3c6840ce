//! Admission review wire format
//!
//! Requests and responses travel as `admission.k8s.io/v1` `AdmissionReview`
//! JSON. [`AdmissionRequest`] is the decoded request the dispatcher works
//! with: the resource is resolved to a [`ResourceKind`] and the embedded
//! objects are kept as raw bytes until an admitter decodes them.
//!
//! ## Status codes
//!
//! - 422 `Invalid` with one cause per finding for validation rejections
//! - 400 with a single message for structural errors
//! - Any other code for explicit denials (an eviction that was turned into
//!   an evacuation is denied with 429)

use crate::context::UserInfo;
use crate::error::AdmissionError;
use crate::finding::Finding;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// Code for validation rejections
pub const CODE_INVALID: u16 = 422;
/// Code for structural errors
pub const CODE_BAD_REQUEST: u16 = 400;
/// Code for denied evictions
pub const CODE_TOO_MANY_REQUESTS: u16 = 429;

/// Operation under admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
        };
        f.write_str(name)
    }
}

/// Group, version and plural resource name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// Resource kinds the dispatcher knows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    VirtualMachineInstance,
    VirtualMachine,
    /// Status subresource of a virtual machine
    VirtualMachineStatus,
    VirtualMachineInstanceMigration,
    /// Eviction of a pod
    Eviction,
    /// Anything else, by plural resource name
    Other(String),
}

impl ResourceKind {
    /// Resolve a resource and optional subresource
    pub fn from_resource(gvr: &GroupVersionResource, sub_resource: Option<&str>) -> Self {
        match (gvr.resource.as_str(), sub_resource) {
            ("virtualmachineinstances", None) => Self::VirtualMachineInstance,
            ("virtualmachines", None) => Self::VirtualMachine,
            ("virtualmachines", Some("status")) => Self::VirtualMachineStatus,
            ("virtualmachineinstancemigrations", None) => Self::VirtualMachineInstanceMigration,
            ("pods", Some("eviction")) => Self::Eviction,
            (resource, Some(sub)) => Self::Other(format!("{resource}/{sub}")),
            (resource, None) => Self::Other(resource.to_string()),
        }
    }

    /// Plural resource name used in error messages
    pub fn resource_name(&self) -> &str {
        match self {
            Self::VirtualMachineInstance => "virtualmachineinstances",
            Self::VirtualMachine => "virtualmachines",
            Self::VirtualMachineStatus => "virtualmachines/status",
            Self::VirtualMachineInstanceMigration => "virtualmachineinstancemigrations",
            Self::Eviction => "pods/eviction",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(name) => f.write_str(name),
            kind => write!(f, "{kind:?}"),
        }
    }
}

/// Request half of a review as it appears on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdmissionReviewRequest {
    pub uid: String,
    pub resource: GroupVersionResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_resource: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    pub user_info: UserInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_object: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

/// A full review, carrying either a request or a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionReviewRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Review carrying a request
    pub fn request(request: AdmissionReviewRequest) -> Self {
        Self {
            api_version: ADMISSION_API_VERSION.to_string(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
            request: Some(request),
            response: None,
        }
    }

    /// Review carrying a response
    pub fn response(response: AdmissionResponse) -> Self {
        Self {
            api_version: ADMISSION_API_VERSION.to_string(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

/// Decoded request handed to admitters
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: Operation,
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    /// Proposed object
    pub object: Vec<u8>,
    /// Previous object, on update
    pub old_object: Option<Vec<u8>>,
    pub user_info: UserInfo,
    pub dry_run: bool,
}

impl AdmissionRequest {
    /// Request with no objects attached
    pub fn new(kind: ResourceKind, operation: Operation) -> Self {
        Self {
            uid: uuid::Uuid::new_v4().to_string(),
            operation,
            kind,
            name: String::new(),
            namespace: String::new(),
            object: Vec::new(),
            old_object: None,
            user_info: UserInfo::default(),
            dry_run: false,
        }
    }

    pub fn with_object<T: Serialize>(mut self, object: &T) -> Self {
        self.object = serde_json::to_vec(object).unwrap_or_default();
        self
    }

    pub fn with_old_object<T: Serialize>(mut self, object: &T) -> Self {
        self.old_object = serde_json::to_vec(object).ok();
        self
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user_info = user;
        self
    }

    pub fn with_target(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.name = name.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Decode the request half of a review
    pub fn from_review(review: &AdmissionReview) -> Result<Self, AdmissionError> {
        let request = review.request.as_ref().ok_or_else(|| AdmissionError::MalformedRequest {
            reason: "review carries no request".to_string(),
        })?;
        let operation = request.operation.ok_or_else(|| AdmissionError::MalformedRequest {
            reason: "request carries no operation".to_string(),
        })?;

        let raw = |value: &Option<serde_json::Value>| -> Result<Option<Vec<u8>>, AdmissionError> {
            value
                .as_ref()
                .filter(|v| !v.is_null())
                .map(serde_json::to_vec)
                .transpose()
                .map_err(|err| AdmissionError::MalformedRequest {
                    reason: err.to_string(),
                })
        };

        Ok(Self {
            uid: request.uid.clone(),
            operation,
            kind: ResourceKind::from_resource(&request.resource, request.sub_resource.as_deref()),
            name: request.name.clone(),
            namespace: request.namespace.clone(),
            object: raw(&request.object)?.unwrap_or_default(),
            old_object: raw(&request.old_object)?,
            user_info: request.user_info.clone(),
            dry_run: request.dry_run.unwrap_or(false),
        })
    }
}

/// One cause of a rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCause {
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
}

impl From<&Finding> for StatusCause {
    fn from(finding: &Finding) -> Self {
        Self {
            reason: finding.kind.reason().to_string(),
            message: finding.message.clone(),
            field: finding.field.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StatusCause>,
}

/// Why a request was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

/// Response half of a review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AdmissionResponse {
    /// Allow, passing warnings through
    pub fn allowed(uid: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            status: None,
            warnings,
        }
    }

    /// Reject with one cause per finding
    pub fn rejected(uid: impl Into<String>, findings: &[Finding]) -> Self {
        let message = findings
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(Status {
                code: CODE_INVALID,
                message,
                reason: "Invalid".to_string(),
                details: Some(StatusDetails {
                    causes: findings.iter().map(StatusCause::from).collect(),
                }),
            }),
            warnings: Vec::new(),
        }
    }

    /// Reject a structurally broken request
    pub fn error(uid: impl Into<String>, err: &AdmissionError) -> Self {
        Self::denied(uid, CODE_BAD_REQUEST, err.to_string())
    }

    /// Reject with an explicit code and message
    pub fn denied(uid: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(Status {
                code,
                message: message.into(),
                reason: String::new(),
                details: None,
            }),
            warnings: Vec::new(),
        }
    }

    /// Causes attached to a rejection
    pub fn causes(&self) -> &[StatusCause] {
        self.status
            .as_ref()
            .and_then(|s| s.details.as_ref())
            .map(|d| d.causes.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldPath;
    use serde_json::json;

    #[test]
    fn test_decode_review() {
        let review: AdmissionReview = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "resource": {"group": "kubevirt.io", "version": "v1", "resource": "virtualmachineinstances"},
                "namespace": "default",
                "operation": "UPDATE",
                "userInfo": {"username": "alice", "groups": ["devs"], "extra": {"scopes": ["a"]}},
                "object": {"metadata": {"name": "vmi"}},
                "oldObject": {"metadata": {"name": "vmi"}},
                "dryRun": true
            }
        }))
        .unwrap();

        let request = AdmissionRequest::from_review(&review).unwrap();
        assert_eq!(request.kind, ResourceKind::VirtualMachineInstance);
        assert_eq!(request.operation, Operation::Update);
        assert_eq!(request.user_info.username, "alice");
        assert_eq!(request.user_info.extra_value("scopes"), Some("a"));
        assert!(request.old_object.is_some());
        assert!(request.dry_run);
    }

    #[test]
    fn test_review_without_request() {
        let review = AdmissionReview::response(AdmissionResponse::allowed("x", Vec::new()));
        assert!(matches!(
            AdmissionRequest::from_review(&review),
            Err(AdmissionError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_eviction_subresource() {
        let pods = GroupVersionResource::new("", "v1", "pods");
        assert_eq!(ResourceKind::from_resource(&pods, Some("eviction")), ResourceKind::Eviction);
        assert_eq!(
            ResourceKind::from_resource(&pods, None),
            ResourceKind::Other("pods".to_string())
        );
    }

    #[test]
    fn test_status_subresource() {
        let vms = GroupVersionResource::new("kubevirt.io", "v1", "virtualmachines");
        assert_eq!(
            ResourceKind::from_resource(&vms, Some("status")),
            ResourceKind::VirtualMachineStatus
        );
        assert_eq!(ResourceKind::VirtualMachineStatus.resource_name(), "virtualmachines/status");

        let vmis = GroupVersionResource::new("kubevirt.io", "v1", "virtualmachineinstances");
        assert_eq!(
            ResourceKind::from_resource(&vmis, Some("status")),
            ResourceKind::Other("virtualmachineinstances/status".to_string())
        );
    }

    #[test]
    fn test_rejection_rendering() {
        let findings = vec![
            Finding::invalid(&FieldPath::from_children(&["spec", "hostname"]), "bad hostname"),
            Finding::required(&FieldPath::root(), "missing memory"),
        ];
        let response = AdmissionResponse::rejected("uid-1", &findings);

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"]["code"], 422);
        assert_eq!(value["status"]["reason"], "Invalid");
        assert_eq!(value["status"]["message"], "bad hostname, missing memory");
        assert_eq!(value["status"]["details"]["causes"][0]["field"], "spec.hostname");
        assert_eq!(value["status"]["details"]["causes"][0]["reason"], "FieldValueInvalid");
        assert!(value["status"]["details"]["causes"][1].get("field").is_none());
    }

    #[test]
    fn test_structural_error_rendering() {
        let err = AdmissionError::UnexpectedKind {
            expected: "virtualmachineinstances".into(),
        };
        let response = AdmissionResponse::error("uid-2", &err);
        let status = response.status.as_ref().unwrap();
        assert_eq!(status.code, 400);
        assert_eq!(status.message, "expect resource to be 'virtualmachineinstances'");
        assert!(response.causes().is_empty());
    }

    #[test]
    fn test_allowed_rendering_keeps_warnings() {
        let response = AdmissionResponse::allowed("uid-3", vec!["careful".into()]);
        let value = serde_json::to_value(AdmissionReview::response(response)).unwrap();
        assert_eq!(value["response"]["allowed"], true);
        assert_eq!(value["response"]["warnings"][0], "careful");
        assert!(value["response"].get("status").is_none());
    }
}
