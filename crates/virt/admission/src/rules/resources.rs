//! Memory and CPU requests and limits
//!
//! Quantities are compared by value; messages echo the quantity text the
//! caller supplied.

use super::common::must_be_positive_message;
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use virt_types::{ClusterConfig, Quantity, QuantityError, VirtualMachineInstanceSpec};

/// Smallest accepted non-zero memory request
const MIN_MEMORY_BYTES: i64 = 1_000_000;

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("resources.memory_request", 300, memory_request),
        Rule::new("resources.memory_limit", 310, memory_limit),
        Rule::new("resources.hugepages", 320, hugepages),
        Rule::new("resources.guest_memory", 330, guest_memory),
        Rule::new("resources.cpu_request_not_negative", 500, cpu_request_not_negative),
        Rule::new("resources.cpu_limit_not_negative", 510, cpu_limit_not_negative),
        Rule::new("resources.cpu_request_within_limit", 520, cpu_request_within_limit),
    ]
}

fn requests(field: &FieldPath, name: &str) -> FieldPath {
    field.children(&["domain", "resources", "requests", name])
}

fn limits(field: &FieldPath, name: &str) -> FieldPath {
    field.children(&["domain", "resources", "limits", name])
}

fn memory_request(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let request = spec.domain.resources.memory_request();
    let path = requests(field, "memory");

    if request.value() < 0 {
        vec![Finding::invalid(&path, must_be_positive_message(&path, &request))]
    } else if request.value() > 0 && request < Quantity::from_units(MIN_MEMORY_BYTES) {
        vec![Finding::invalid(
            &path,
            format!("{path} '{request}': must be greater than or equal to 1M."),
        )]
    } else {
        Vec::new()
    }
}

fn memory_limit(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let resources = &spec.domain.resources;
    let request = resources.memory_request();
    let limit = resources.memory_limit();
    let limit_path = limits(field, "memory");
    let mut findings = Vec::new();

    if limit.value() < 0 {
        findings.push(Finding::invalid(
            &limit_path,
            must_be_positive_message(&limit_path, &limit),
        ));
    }
    if limit.value() > 0 && request.value() > limit.value() {
        let request_path = requests(field, "memory");
        findings.push(Finding::invalid(
            &request_path,
            format!("{request_path} '{request}' is greater than {limit_path} '{limit}'"),
        ));
    }
    findings
}

fn hugepages(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(hugepages) = spec.domain.hugepages() else {
        return Vec::new();
    };
    let size_path = field.children(&["domain", "hugepages", "size"]);
    let page_size = &hugepages.page_size;

    let page = match Quantity::parse(page_size) {
        Ok(page) => page,
        Err(_) => {
            return vec![Finding::invalid(
                &size_path,
                format!("{size_path} '{page_size}': {}", QuantityError::FormatWrong),
            )];
        }
    };

    let page_bytes = page.value();
    if page_bytes <= 0 {
        return Vec::new();
    }

    let request = spec.domain.resources.memory_request();
    let request_path = requests(field, "memory");
    let memory = request.value();

    if memory < page_bytes {
        vec![Finding::invalid(
            &request_path,
            format!(
                "{request_path} '{request}' must be equal to or larger than page size {size_path} '{page_size}'"
            ),
        )]
    } else if memory % page_bytes != 0 {
        vec![Finding::invalid(
            &request_path,
            format!(
                "{request_path} '{request}' is not a multiple of the page size {size_path} '{page_size}'"
            ),
        )]
    } else {
        Vec::new()
    }
}

fn guest_memory(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(guest) = spec.domain.memory.as_ref().and_then(|m| m.guest.as_ref()) else {
        return Vec::new();
    };
    let limit = spec.domain.resources.memory_limit();
    if limit.value() == 0 || limit.value() >= guest.value() {
        return Vec::new();
    }
    let guest_path = field.children(&["domain", "memory", "guest"]);
    let limit_path = limits(field, "memory");
    vec![Finding::invalid(
        &guest_path,
        format!(
            "{guest_path} '{guest}' must be equal to or less than the memory limit {limit_path} '{limit}'"
        ),
    )]
}

fn cpu_request_not_negative(
    field: &FieldPath,
    spec: &VirtualMachineInstanceSpec,
    _: &ClusterConfig,
) -> Vec<Finding> {
    let request = spec.domain.resources.cpu_request();
    if request.milli_value() >= 0 {
        return Vec::new();
    }
    let path = requests(field, "cpu");
    vec![Finding::invalid(&path, must_be_positive_message(&path, &request))]
}

fn cpu_limit_not_negative(
    field: &FieldPath,
    spec: &VirtualMachineInstanceSpec,
    _: &ClusterConfig,
) -> Vec<Finding> {
    let limit = spec.domain.resources.cpu_limit();
    if limit.milli_value() >= 0 {
        return Vec::new();
    }
    let path = limits(field, "cpu");
    vec![Finding::invalid(&path, must_be_positive_message(&path, &limit))]
}

fn cpu_request_within_limit(
    field: &FieldPath,
    spec: &VirtualMachineInstanceSpec,
    _: &ClusterConfig,
) -> Vec<Finding> {
    let request = spec.domain.resources.cpu_request();
    let limit = spec.domain.resources.cpu_limit();
    if limit.milli_value() <= 0 || request.milli_value() <= limit.milli_value() {
        return Vec::new();
    }
    let request_path = requests(field, "cpu");
    let limit_path = limits(field, "cpu");
    vec![Finding::invalid(
        &request_path,
        format!("{request_path} '{request}' is greater than {limit_path} '{limit}'"),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use virt_types::domain::{Hugepages, Memory, RESOURCE_CPU, RESOURCE_MEMORY};

    fn spec_with(requests: &[(&str, &str)], limits: &[(&str, &str)]) -> VirtualMachineInstanceSpec {
        let mut spec = VirtualMachineInstanceSpec::default();
        for (name, value) in requests {
            spec.domain
                .resources
                .requests
                .insert((*name).to_string(), Quantity::parse(value).unwrap());
        }
        for (name, value) in limits {
            spec.domain
                .resources
                .limits
                .insert((*name).to_string(), Quantity::parse(value).unwrap());
        }
        spec
    }

    fn with_page_size(mut spec: VirtualMachineInstanceSpec, size: &str) -> VirtualMachineInstanceSpec {
        spec.domain.memory = Some(Memory {
            hugepages: Some(Hugepages {
                page_size: size.into(),
            }),
            ..Default::default()
        });
        spec
    }

    #[test]
    fn test_negative_cpu_request() {
        let spec = spec_with(&[(RESOURCE_CPU, "-200m")], &[]);
        let config = ClusterConfig::default();
        let findings = cpu_request_not_negative(&FieldPath::root(), &spec, &config);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field.to_string(), "domain.resources.requests.cpu");
        assert_eq!(
            findings[0].message,
            "domain.resources.requests.cpu '-200m': must be greater than or equal to 0."
        );
        assert!(cpu_request_within_limit(&FieldPath::root(), &spec, &config).is_empty());
    }

    #[test]
    fn test_small_memory_request() {
        let spec = spec_with(&[(RESOURCE_MEMORY, "512k")], &[]);
        let findings = memory_request(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(
            findings[0].message,
            "domain.resources.requests.memory '512k': must be greater than or equal to 1M."
        );
    }

    #[test]
    fn test_memory_request_above_limit() {
        let spec = spec_with(&[(RESOURCE_MEMORY, "128Mi")], &[(RESOURCE_MEMORY, "64Mi")]);
        let findings = memory_limit(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "domain.resources.requests.memory '128Mi' is greater than domain.resources.limits.memory '64Mi'"
        );
    }

    #[test]
    fn test_unparsable_page_size() {
        let spec = with_page_size(spec_with(&[(RESOURCE_MEMORY, "64Mi")], &[]), "2ab");
        let findings = hugepages(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].field.to_string(), "domain.hugepages.size");
        assert!(findings[0].message.starts_with("domain.hugepages.size '2ab': quantities must match"));
    }

    #[test]
    fn test_memory_not_multiple_of_page_size() {
        let spec = with_page_size(spec_with(&[(RESOURCE_MEMORY, "64Mi")], &[]), "10Mi");
        let findings = hugepages(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "domain.resources.requests.memory '64Mi' is not a multiple of the page size domain.hugepages.size '10Mi'"
        );
    }

    #[test]
    fn test_memory_smaller_than_page() {
        let spec = with_page_size(spec_with(&[(RESOURCE_MEMORY, "1Mi")], &[]), "2Mi");
        let findings = hugepages(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert!(findings[0].message.contains("must be equal to or larger than page size"));

        let aligned = with_page_size(spec_with(&[(RESOURCE_MEMORY, "64Mi")], &[]), "2Mi");
        assert!(hugepages(&FieldPath::root(), &aligned, &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_guest_memory_above_limit() {
        let mut spec = spec_with(&[], &[(RESOURCE_MEMORY, "64Mi")]);
        spec.domain.memory = Some(Memory {
            guest: Some(Quantity::parse("128Mi").unwrap()),
            ..Default::default()
        });
        let findings = guest_memory(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings[0].field.to_string(), "domain.memory.guest");
    }

    #[test]
    fn test_cpu_request_above_limit() {
        let spec = spec_with(&[(RESOURCE_CPU, "2")], &[(RESOURCE_CPU, "1500m")]);
        let findings = cpu_request_within_limit(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(
            findings[0].message,
            "domain.resources.requests.cpu '2' is greater than domain.resources.limits.cpu '1500m'"
        );
    }
}
