//! Guest hostname and subdomain

use super::common::{dns1123_label_errors, dns1123_subdomain_errors};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, VirtualMachineInstanceSpec};

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("hostname.dns_label", 200, hostname),
        Rule::new("hostname.subdomain", 210, subdomain),
    ]
}

fn hostname(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(hostname) = spec.hostname.as_deref().filter(|h| !h.is_empty()) else {
        return Vec::new();
    };
    let errors = dns1123_label_errors(hostname);
    if errors.is_empty() {
        return Vec::new();
    }
    let path = field.child("hostname");
    vec![Finding::invalid(
        &path,
        format!(
            "{path} does not conform to the kubernetes DNS_LABEL rules : {}",
            errors.join(", ")
        ),
    )]
}

fn subdomain(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(subdomain) = spec.subdomain.as_deref().filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    let errors = dns1123_subdomain_errors(subdomain);
    if errors.is_empty() {
        return Vec::new();
    }
    let path = field.child("subdomain");
    vec![Finding::invalid(
        &path,
        format!(
            "{path} does not conform to the kubernetes DNS_SUBDOMAIN rules : {}",
            errors.join(", ")
        ),
    )]
}
