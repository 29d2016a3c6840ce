//! Admission context and capabilities
//!
//! Capabilities are resolved once per request from the requesting user and
//! carried in the [`AdmissionContext`]. Rules and policies only ever ask the
//! context what the actor may do; they never inspect identities themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Something an actor is allowed to do
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// May change the spec of a running instance within the hotplug subset
    MutateSpec,

    /// May set or change reserved labels and annotations
    SetPrivilegedLabels,

    /// Acts on behalf of the given node
    ActAsNode(String),
}

/// Capabilities held by one actor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// No capabilities
    pub fn none() -> Self {
        Self::default()
    }

    /// Spec mutation and reserved labels
    pub fn privileged() -> Self {
        Self::none()
            .with(Capability::MutateSpec)
            .with(Capability::SetPrivilegedLabels)
    }

    /// Privileged capabilities restricted to a node
    pub fn node_agent(node: impl Into<String>) -> Self {
        Self::privileged().with(Capability::ActAsNode(node.into()))
    }

    /// Add a capability
    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn has(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn can_mutate_spec(&self) -> bool {
        self.has(&Capability::MutateSpec)
    }

    pub fn can_set_privileged_labels(&self) -> bool {
        self.has(&Capability::SetPrivilegedLabels)
    }

    /// Node the actor acts for, if it is a node agent
    pub fn node_identity(&self) -> Option<&str> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::ActAsNode(node) => Some(node.as_str()),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }
}

/// Identity of the requesting user as reported by the API server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    pub username: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.entry(key.into()).or_default().push(value.into());
        self
    }

    /// First value of an extra attribute
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Maps a requesting user to capabilities
pub trait CapabilityResolver: Send + Sync + std::fmt::Debug {
    /// Resolve the capabilities of a user
    fn resolve(&self, user: &UserInfo) -> CapabilitySet;
}

/// Extra attribute carrying the node name of a node agent
pub const DEFAULT_NODE_NAME_EXTRA_KEY: &str = "authentication.kubernetes.io/node-name";

/// Who holds which capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Usernames granted spec mutation and reserved labels
    pub privileged_users: Vec<String>,

    /// Groups granted spec mutation and reserved labels
    pub privileged_groups: Vec<String>,

    /// Usernames of per-node agents
    pub node_agents: Vec<String>,

    /// User extra attribute naming the agent's node
    pub node_name_extra_key: String,

    /// Exact reserved label keys
    pub reserved_labels: Vec<String>,

    /// Reserved label prefix checked on create, empty for none
    pub reserved_prefix: String,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            privileged_users: vec![
                "system:serviceaccount:kubevirt:kubevirt-controller".to_string(),
                "system:serviceaccount:kubevirt:kubevirt-apiserver".to_string(),
            ],
            privileged_groups: Vec::new(),
            node_agents: vec!["system:serviceaccount:kubevirt:kubevirt-handler".to_string()],
            node_name_extra_key: DEFAULT_NODE_NAME_EXTRA_KEY.to_string(),
            reserved_labels: crate::labels::RESTRICTED_LABELS
                .iter()
                .map(|l| (*l).to_string())
                .collect(),
            reserved_prefix: String::new(),
        }
    }
}

/// Resolves capabilities from configured identity and group lists
#[derive(Debug, Clone, Default)]
pub struct IdentityCapabilityResolver {
    config: AuthorizationConfig,
}

impl IdentityCapabilityResolver {
    pub fn new(config: AuthorizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }
}

impl CapabilityResolver for IdentityCapabilityResolver {
    fn resolve(&self, user: &UserInfo) -> CapabilitySet {
        if self.config.node_agents.contains(&user.username) {
            // An agent without a node identity gets nothing
            return user
                .extra_value(&self.config.node_name_extra_key)
                .map(CapabilitySet::node_agent)
                .unwrap_or_default();
        }

        let privileged = self.config.privileged_users.contains(&user.username)
            || user
                .groups
                .iter()
                .any(|g| self.config.privileged_groups.contains(g));
        if privileged {
            CapabilitySet::privileged()
        } else {
            CapabilitySet::none()
        }
    }
}

/// Per-request admission context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionContext {
    /// Request ID for correlation
    pub request_id: String,

    /// Requesting user
    pub user: UserInfo,

    /// Capabilities resolved for the user
    pub capabilities: CapabilitySet,

    /// Whether side effects must be skipped
    pub dry_run: bool,

    /// When the request was received
    pub timestamp: DateTime<Utc>,
}

impl AdmissionContext {
    /// Context for a user with no capabilities
    pub fn new(user: UserInfo) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user,
            capabilities: CapabilitySet::none(),
            dry_run: false,
            timestamp: Utc::now(),
        }
    }

    /// Context whose capabilities come from a resolver
    pub fn resolved(user: UserInfo, resolver: &dyn CapabilityResolver) -> Self {
        let capabilities = resolver.resolve(&user);
        Self::new(user).with_capabilities(capabilities)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Name of the requesting user
    pub fn actor(&self) -> &str {
        &self.user.username
    }
}

impl Default for AdmissionContext {
    fn default() -> Self {
        Self::new(UserInfo::new("anonymous"))
    }
}
