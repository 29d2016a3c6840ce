//! Start strategy, architecture, IO threads, eviction and guest DNS

use super::common::{dns1123_subdomain_errors, is_ip};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::cluster::eviction_strategy;
use virt_types::{ClusterConfig, FeatureGate, VirtualMachineInstanceSpec};

const START_STRATEGY_PAUSED: &str = "Paused";
const IO_THREADS_POLICIES: &[&str] = &["shared", "auto"];

const DNS_POLICY_NONE: &str = "None";
const DNS_POLICIES: &[&str] = &["ClusterFirstWithHostNet", "ClusterFirst", "Default", DNS_POLICY_NONE, ""];
const MAX_DNS_NAMESERVERS: usize = 3;
const MAX_DNS_SEARCH_PATHS: usize = 6;
const MAX_DNS_SEARCH_LIST_CHARS: usize = 256;

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("scheduling.start_strategy", 700, start_strategy),
        Rule::new("scheduling.architecture", 720, architecture).gated(FeatureGate::MultiArchitecture),
        Rule::new("scheduling.io_threads_policy", 1310, io_threads_policy),
        Rule::new("scheduling.dns_policy", 1700, dns_policy),
        Rule::new("scheduling.dns_config", 1710, dns_config),
        Rule::new("scheduling.eviction_strategy", 1720, eviction),
    ]
}

fn start_strategy(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(strategy) = spec.start_strategy.as_deref() else {
        return Vec::new();
    };
    let path = field.child("startStrategy");
    if strategy != START_STRATEGY_PAUSED {
        vec![Finding::invalid(
            &path,
            format!("{path} is set with an unrecognized option: {strategy}"),
        )]
    } else if spec.liveness_probe.is_some() {
        let probe = field.child("livenessProbe");
        vec![Finding::invalid(
            &path,
            format!(
                "either {path} or {probe} should be provided.Pausing VMI with LivenessProbe is not supported"
            ),
        )]
    } else {
        Vec::new()
    }
}

fn architecture(field: &FieldPath, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Vec<Finding> {
    match spec.architecture.as_deref() {
        Some(arch) if !arch.is_empty() && arch != config.default_architecture => {
            let path = field.child("architecture");
            vec![Finding::required(
                &path,
                format!("multi-architecture feature gate is not enabled in kubevirt-config, invalid entry {path}"),
            )]
        }
        _ => Vec::new(),
    }
}

fn io_threads_policy(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    match spec.domain.io_threads_policy.as_deref() {
        Some(policy) if !IO_THREADS_POLICIES.contains(&policy) => vec![Finding::invalid(
            &field.children(&["domain", "ioThreadsPolicy"]),
            format!("Invalid IOThreadsPolicy ({policy})"),
        )],
        _ => Vec::new(),
    }
}

fn dns_policy(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    match spec.dns_policy.as_deref() {
        Some(policy) if !DNS_POLICIES.contains(&policy) => vec![Finding::not_supported(
            &field.child("dnsPolicy"),
            format!(
                "DNSPolicy: {policy} is not supported, valid values: [{}]",
                DNS_POLICIES.join(" ")
            ),
        )],
        _ => Vec::new(),
    }
}

fn dns_config(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let path = field.child("dnsConfig");
    let nameservers_path = path.child("nameservers");
    let searches_path = path.child("searches");

    if spec.dns_policy.as_deref() == Some(DNS_POLICY_NONE) {
        match &spec.dns_config {
            None => {
                return vec![Finding::required(
                    &path,
                    format!("must provide `dnsConfig` when `dnsPolicy` is {DNS_POLICY_NONE}"),
                )];
            }
            Some(config) if config.nameservers.is_empty() => {
                return vec![Finding::required(
                    &nameservers_path,
                    format!("must provide at least one DNS nameserver when `dnsPolicy` is {DNS_POLICY_NONE}"),
                )];
            }
            Some(_) => {}
        }
    }

    let Some(config) = &spec.dns_config else {
        return Vec::new();
    };
    let mut findings = Vec::new();

    if config.nameservers.len() > MAX_DNS_NAMESERVERS {
        findings.push(Finding::invalid(
            &nameservers_path,
            format!(
                "must not have more than {MAX_DNS_NAMESERVERS} nameservers: [{}]",
                config.nameservers.join(" ")
            ),
        ));
    }
    for nameserver in config.nameservers.iter().filter(|ns| !is_ip(ns)) {
        findings.push(Finding::invalid(
            &nameservers_path,
            format!("must be valid IP address: {nameserver}"),
        ));
    }

    if config.searches.len() > MAX_DNS_SEARCH_PATHS {
        findings.push(Finding::invalid(
            &searches_path,
            format!("must not have more than {MAX_DNS_SEARCH_PATHS} search paths"),
        ));
    }
    if config.searches.join(" ").len() > MAX_DNS_SEARCH_LIST_CHARS {
        findings.push(Finding::invalid(
            &searches_path,
            format!(
                "must not have more than {MAX_DNS_SEARCH_LIST_CHARS} characters (including spaces) in the search list"
            ),
        ));
    }
    for search in &config.searches {
        findings.extend(
            dns1123_subdomain_errors(search)
                .into_iter()
                .map(|msg| Finding::invalid(&searches_path, msg)),
        );
    }

    let options_path = path.child("options");
    for _ in config.options.iter().filter(|o| o.name.is_empty()) {
        findings.push(Finding::invalid(&options_path, "Option.Name must not be empty"));
    }
    findings
}

fn eviction(field: &FieldPath, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Vec<Finding> {
    let Some(strategy) = spec
        .eviction_strategy
        .as_deref()
        .or(config.eviction_strategy.as_deref())
    else {
        return Vec::new();
    };
    if eviction_strategy::ALL.contains(&strategy) {
        return Vec::new();
    }
    let path = field.child("evictionStrategy");
    vec![Finding::invalid(
        &path,
        format!("{path} is set with an unrecognized option: {strategy}"),
    )]
}
