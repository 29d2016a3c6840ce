//! Networks an interface can connect to

use serde::{Deserialize, Serialize};

/// A named network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub name: String,

    /// The pod's primary network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,

    /// A secondary network provided by a CNI delegating plugin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,
}

impl Network {
    /// The pod network under the given name
    pub fn pod(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pod: Some(PodNetwork::default()),
            multus: None,
        }
    }

    /// A multus network under the given name
    pub fn multus(name: impl Into<String>, network_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pod: None,
            multus: Some(MultusNetwork {
                network_name: network_name.into(),
                default: false,
            }),
        }
    }

    /// Number of network types set
    pub fn type_count(&self) -> usize {
        usize::from(self.pod.is_some()) + usize::from(self.multus.is_some())
    }

    /// Whether this is a multus network marked as the default
    pub fn is_multus_default(&self) -> bool {
        self.multus.as_ref().is_some_and(|m| m.default)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodNetwork {
    #[serde(rename = "vmNetworkCIDR", skip_serializing_if = "String::is_empty")]
    pub vm_network_cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultusNetwork {
    pub network_name: String,
    pub default: bool,
}
