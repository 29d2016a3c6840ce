//! Shared helpers for rule implementations
//!
//! Syntax checks for names, addresses and paths used across several rule
//! groups, plus the message formats those groups share.

use crate::field::FieldPath;
use crate::finding::Finding;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;
use virt_types::FeatureGate;

/// Maximum length of list fields
pub const ARRAY_LEN_MAX: usize = 256;

/// Maximum length of free-form string fields
pub const MAX_STR_LEN: usize = 256;

const DNS1123_LABEL_MAX_LEN: usize = 63;
const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;
const PORT_NAME_MAX_LEN: usize = 15;

const DNS1123_LABEL_ERR: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character (e.g. 'my-name',  or '123-abc', regex used for validation is '[a-z0-9]([-a-z0-9]*[a-z0-9])?')";
const DNS1123_SUBDOMAIN_ERR: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character (e.g. 'example.com', regex used for validation is '[a-z0-9]([-a-z0-9]*[a-z0-9])?(\\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*')";

/// "`<field>` '`<name>`' not found."
pub fn not_found_message(field: &FieldPath, name: &str) -> String {
    format!("{field} '{name}' not found.")
}

/// "`<field>` list exceeds the 256 element limit in length"
pub fn list_exceeds_limit_message(field: &FieldPath) -> String {
    format!("{field} list exceeds the {ARRAY_LEN_MAX} element limit in length")
}

/// "`<field>` '`<value>`': must be greater than or equal to 0."
pub fn must_be_positive_message(field: &FieldPath, value: impl std::fmt::Display) -> String {
    format!("{field} '{value}': must be greater than or equal to 0.")
}

/// "`<field>` is a required field"
pub fn required_field_message(field: &FieldPath) -> String {
    format!("{field} is a required field")
}

/// Message for use of a feature behind a disabled gate
pub fn gate_not_enabled_message(gate: FeatureGate) -> String {
    format!("{gate} feature gate is not enabled in kubevirt-config")
}

/// Finding for use of a feature behind a disabled gate
pub fn gate_not_enabled(field: &FieldPath, gate: FeatureGate) -> Finding {
    Finding::invalid(field, gate_not_enabled_message(gate))
}

static DNS1123_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid label pattern"));
static DNS1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid subdomain pattern")
});
static PORT_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-a-z0-9]+$").expect("valid port name pattern"));
static PORT_NAME_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z]").expect("valid letter pattern"));
static SERIAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.+-]+$").expect("valid serial pattern"));
static INTERFACE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid interface name pattern"));

/// Problems with a value used as an RFC 1123 label
pub fn dns1123_label_errors(value: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if value.len() > DNS1123_LABEL_MAX_LEN {
        errors.push(format!("must be no more than {DNS1123_LABEL_MAX_LEN} characters"));
    }
    if !DNS1123_LABEL.is_match(value) {
        errors.push(DNS1123_LABEL_ERR.to_string());
    }
    errors
}

/// Problems with a value used as an RFC 1123 subdomain
pub fn dns1123_subdomain_errors(value: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        errors.push(format!("must be no more than {DNS1123_SUBDOMAIN_MAX_LEN} characters"));
    }
    if !DNS1123_SUBDOMAIN.is_match(value) {
        errors.push(DNS1123_SUBDOMAIN_ERR.to_string());
    }
    errors
}

/// Whether a value is a valid IANA service port name
pub fn is_valid_port_name(value: &str) -> bool {
    value.len() <= PORT_NAME_MAX_LEN
        && PORT_NAME_CHARS.is_match(value)
        && PORT_NAME_LETTER.is_match(value)
        && !value.starts_with('-')
        && !value.ends_with('-')
        && !value.contains("--")
}

/// Whether a value matches `^[A-Za-z0-9_.+-]+$`
pub fn is_serial_charset(value: &str) -> bool {
    SERIAL.is_match(value)
}

/// Whether a value matches `^[A-Za-z0-9-_]+$`
pub fn is_interface_name(value: &str) -> bool {
    INTERFACE_NAME.is_match(value)
}

/// Parse a hardware address, returning its length in bytes
///
/// Accepts `:` or `-` separated octets and `.` separated groups of four hex
/// digits, for 6, 8 or 20 byte addresses.
pub fn parse_mac(value: &str) -> Option<usize> {
    let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
    let valid_len = |n: usize| matches!(n, 6 | 8 | 20);

    if value.contains('.') {
        let groups: Vec<&str> = value.split('.').collect();
        let bytes = groups.len() * 2;
        return (valid_len(bytes) && groups.iter().all(|g| is_hex(g, 4))).then_some(bytes);
    }

    let separator = if value.contains(':') { ':' } else { '-' };
    let octets: Vec<&str> = value.split(separator).collect();
    (valid_len(octets.len()) && octets.iter().all(|o| is_hex(o, 2))).then_some(octets.len())
}

/// Whether a value is a PCI address of the form `dddd:bb:ss.f`
pub fn is_pci_address(value: &str) -> bool {
    let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
    let Some((head, function)) = value.rsplit_once('.') else {
        return false;
    };
    let parts: Vec<&str> = head.split(':').collect();
    parts.len() == 3
        && is_hex(parts[0], 4)
        && is_hex(parts[1], 2)
        && is_hex(parts[2], 2)
        && function.len() == 1
        && function.chars().all(|c| ('0'..='7').contains(&c))
}

/// Whether a value is an IP address
pub fn is_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Whether a value is an IPv4 address, including IPv4-mapped IPv6
pub fn is_ipv4(value: &str) -> bool {
    match value.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => true,
        Ok(IpAddr::V6(v6)) => v6.to_ipv4_mapped().is_some(),
        Err(_) => false,
    }
}

/// Lexically clean an absolute path
fn clean_absolute(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Check that a path is absolute, clean and not the root
pub fn validate_path(field: &FieldPath, path: &str) -> Vec<Finding> {
    if path == "/" {
        return vec![Finding::invalid(field, format!("{field} must not point to root"))];
    }
    if clean_absolute(path) != path.trim_end_matches('/') {
        return vec![Finding::invalid(
            field,
            format!("{field} must be an absolute path to a file without relative components"),
        )];
    }
    Vec::new()
}
