//! Networks and the interfaces attached to them

use super::boot::BootOrders;
use super::common::{is_interface_name, is_ipv4, is_pci_address, is_valid_port_name, not_found_message, parse_mac};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use std::collections::BTreeSet;
use virt_types::{ClusterConfig, FeatureGate, Interface, Network, VirtualMachineInstanceSpec};

const INTERFACE_MODELS: &[&str] = &["e1000", "e1000e", "ne2k_pci", "pcnet", "rtl8139", "virtio"];

/// MAC address of the in-pod bridge used by masquerade bindings
const RESERVED_MAC: &str = "02:00:00:00:00:00";

const DHCP_PRIVATE_OPTION_MIN: i32 = 224;
const DHCP_PRIVATE_OPTION_MAX: i32 = 254;
const PORT_MAX: i32 = 65536;

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("network.types", 1000, network_types),
        Rule::new("network.multus_default", 1010, multus_default),
        Rule::new("network.pod_with_multus_default", 1020, pod_with_multus_default),
        Rule::new("network.interfaces", 1100, interfaces),
        Rule::new("network.dhcp_duplicates", 1105, dhcp_duplicates).halting(),
        Rule::new("network.assigned", 1200, networks_assigned),
    ]
}

fn network_types(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let networks = field.child("networks");
    let mut findings = Vec::new();

    for (idx, network) in spec.networks.iter().enumerate() {
        let path = networks.index(idx);
        match network.type_count() {
            0 => findings.push(Finding::required(&path, "should have a network type")),
            1 => {}
            _ => findings.push(Finding::required(&path, "should have only one network type")),
        }
        if network
            .multus
            .as_ref()
            .is_some_and(|m| m.network_name.is_empty())
        {
            findings.push(Finding::required(&path, "CNI delegating plugin must have a networkName"));
        }
    }
    findings
}

fn multus_default_count(spec: &VirtualMachineInstanceSpec) -> usize {
    spec.networks.iter().filter(|n| n.is_multus_default()).count()
}

fn multus_default(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    if multus_default_count(spec) > 1 {
        vec![Finding::invalid(
            &field.child("networks"),
            "Multus CNI should only have one default network",
        )]
    } else {
        Vec::new()
    }
}

fn pod_with_multus_default(
    field: &FieldPath,
    spec: &VirtualMachineInstanceSpec,
    _: &ClusterConfig,
) -> Vec<Finding> {
    if spec.pod_network().is_some() && multus_default_count(spec) > 0 {
        vec![Finding::invalid(
            &field.child("networks"),
            "Pod network cannot be defined when Multus default network is defined",
        )]
    } else {
        Vec::new()
    }
}

/// Binding checks for one interface; only the first problem is reported
fn binding_basics(
    name_path: &FieldPath,
    iface_path: &FieldPath,
    iface: &Interface,
    network: Option<&Network>,
    interface_count: usize,
    config: &ClusterConfig,
) -> Option<Finding> {
    let Some(network) = network else {
        return Some(Finding::invalid(name_path, not_found_message(name_path, &iface.name)));
    };
    let on_pod = network.pod.is_some();
    let invalid = |message: &str| Some(Finding::invalid(name_path, message));

    if iface.slirp.is_some() && !on_pod {
        invalid("Slirp interface only implemented with pod network")
    } else if iface.slirp.is_some() && !config.permit_slirp_interface {
        invalid("Slirp interface is not enabled in kubevirt-config")
    } else if iface.masquerade.is_some() && !on_pod {
        invalid("Masquerade interface only implemented with pod network")
    } else if iface.masquerade.is_some() && iface.mac_address.eq_ignore_ascii_case(RESERVED_MAC) {
        Some(Finding::invalid(
            &iface_path.child("macAddress"),
            "The requested MAC address is reserved for the in-pod bridge. Please choose another one.",
        ))
    } else if iface.bridge.is_some() && on_pod && !config.permit_bridge_interface_on_pod_network {
        invalid("Bridge on pod network configuration is not enabled under kubevirt-config")
    } else if iface.macvtap.is_some() && !config.is_enabled(FeatureGate::Macvtap) {
        invalid("Macvtap feature gate is not enabled")
    } else if iface.macvtap.is_some() && network.multus.is_none() {
        invalid("Macvtap interface only implemented with Multus network")
    } else if iface.passt.is_some() && !config.is_enabled(FeatureGate::Passt) {
        invalid("Passt feature gate is not enabled")
    } else if iface.passt.is_some() && !on_pod {
        invalid("Passt interface only implemented with pod network")
    } else if iface.passt.is_some() && interface_count > 1 {
        invalid("Passt interface is only supported as the single interface of the VMI")
    } else if iface.binding.is_some() && !config.is_enabled(FeatureGate::NetworkBindingPlugins) {
        invalid("Binding plugins feature gate is not enabled")
    } else {
        None
    }
}

fn ports(
    iface_path: &FieldPath,
    iface: &Interface,
    seen_names: &mut BTreeSet<String>,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (port_idx, port) in iface.ports.iter().enumerate() {
        let port_path = iface_path.child("ports").index(port_idx);

        if port.port == 0 {
            findings.push(Finding::required(&port_path, "Port field is mandatory."));
        }
        if port.port < 0 || port.port > PORT_MAX {
            findings.push(Finding::invalid(
                &port_path,
                "Port field must be in range 0 < x < 65536.",
            ));
        }
        if !port.protocol.is_empty() && port.protocol != "TCP" && port.protocol != "UDP" {
            findings.push(Finding::invalid(
                &port_path.child("protocol"),
                "Unknown protocol, only TCP or UDP allowed",
            ));
        }
        if !port.name.is_empty() {
            let name_path = port_path.child("name");
            if seen_names.contains(&port.name) {
                findings.push(Finding::duplicate(
                    &name_path,
                    format!("Duplicate name of the port: {}", port.name),
                ));
            }
            if !is_valid_port_name(&port.name) {
                findings.push(Finding::invalid(
                    &name_path,
                    format!("Invalid name of the port: {}", port.name),
                ));
            }
            seen_names.insert(port.name.clone());
        }
    }
    findings
}

fn interfaces(field: &FieldPath, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Vec<Finding> {
    let interfaces_path = field.children(&["domain", "devices", "interfaces"]);
    let interface_count = spec.domain.devices.interfaces.len();
    let mut connected: BTreeSet<&str> = BTreeSet::new();
    let mut port_names = BTreeSet::new();
    let mut boot_orders = BootOrders::from_disks(spec);
    let mut findings = Vec::new();

    for (idx, iface) in spec.domain.devices.interfaces.iter().enumerate() {
        let iface_path = interfaces_path.index(idx);
        let name_path = iface_path.child("name");
        let network = spec.network(&iface.name);

        findings.extend(binding_basics(
            &name_path,
            &iface_path,
            iface,
            network,
            interface_count,
            config,
        ));

        if !connected.insert(iface.name.as_str()) {
            findings.push(Finding::duplicate(
                &name_path,
                "Only one interface can be connected to one specific network",
            ));
        }
        if !is_interface_name(&iface.name) {
            findings.push(Finding::invalid(
                &name_path,
                "Network interface name can only contain alphabetical characters, numbers, dashes (-) or underscores (_)",
            ));
        }

        if network.is_some_and(|n| n.pod.is_some()) {
            findings.extend(ports(&iface_path, iface, &mut port_names));
        }

        if !iface.model.is_empty() && !INTERFACE_MODELS.contains(&iface.model.as_str()) {
            findings.push(Finding::not_supported(
                &iface_path.child("model"),
                format!(
                    "interface {name_path} uses model {} that is not supported.",
                    iface.model
                ),
            ));
        }

        if !iface.mac_address.is_empty() {
            let mac_path = iface_path.child("macAddress");
            match parse_mac(&iface.mac_address) {
                None => findings.push(Finding::invalid(
                    &mac_path,
                    format!(
                        "interface {name_path} has malformed MAC address ({}).",
                        iface.mac_address
                    ),
                )),
                Some(len) if len > 6 => findings.push(Finding::invalid(
                    &mac_path,
                    format!(
                        "interface {name_path} has MAC address ({}) that is too long.",
                        iface.mac_address
                    ),
                )),
                Some(_) => {}
            }
        }

        if let Some(order) = iface.boot_order {
            let order_path = iface_path.child("bootOrder");
            if order < 1 {
                findings.push(Finding::invalid(
                    &order_path,
                    format!("{iface_path} must have a boot order > 0, if supplied"),
                ));
            } else if !boot_orders.claim(order) {
                findings.push(Finding::invalid(
                    &order_path,
                    format!("Boot order for {order_path} already set for a different device."),
                ));
            }
        }

        if !iface.pci_address.is_empty() && !is_pci_address(&iface.pci_address) {
            findings.push(Finding::invalid(
                &iface_path.child("pciAddress"),
                format!(
                    "interface {name_path} has malformed PCI address ({}).",
                    iface.pci_address
                ),
            ));
        }

        if let Some(dhcp) = &iface.dhcp_options {
            let options_path = iface_path.children(&["dhcpOptions", "privateOptions"]);
            if dhcp
                .private_options
                .iter()
                .any(|o| !(DHCP_PRIVATE_OPTION_MIN..=DHCP_PRIVATE_OPTION_MAX).contains(&o.option))
            {
                findings.push(Finding::invalid(
                    &options_path,
                    format!(
                        "provided DHCPPrivateOptions are out of range, must be in range {DHCP_PRIVATE_OPTION_MIN} to {DHCP_PRIVATE_OPTION_MAX}"
                    ),
                ));
            }

            let ntp_path = iface_path.children(&["dhcpOptions", "ntpServers"]);
            for (ntp_idx, _) in dhcp
                .ntp_servers
                .iter()
                .enumerate()
                .filter(|(_, server)| !is_ipv4(server))
            {
                findings.push(Finding::invalid(
                    &ntp_path.index(ntp_idx),
                    "NTP servers must be a list of valid IPv4 addresses.",
                ));
            }
        }
    }
    findings
}

/// Repeated DHCP private options stop the rest of the table
fn dhcp_duplicates(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let interfaces_path = field.children(&["domain", "devices", "interfaces"]);
    for (idx, iface) in spec.domain.devices.interfaces.iter().enumerate() {
        let Some(dhcp) = &iface.dhcp_options else {
            continue;
        };
        let mut seen = BTreeSet::new();
        if dhcp.private_options.iter().any(|o| !seen.insert(o.option)) {
            return vec![Finding::invalid(
                &interfaces_path
                    .index(idx)
                    .children(&["dhcpOptions", "privateOptions"]),
                "Found Duplicates: you have provided duplicate DHCPPrivateOptions",
            )];
        }
    }
    Vec::new()
}

fn networks_assigned(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let networks_path = field.child("networks");
    let mut seen = BTreeSet::new();
    let mut findings = Vec::new();

    for (idx, network) in spec.networks.iter().enumerate() {
        let name_path = networks_path.index(idx).child("name");
        if !seen.insert(network.name.as_str()) {
            findings.push(Finding::duplicate(
                &name_path,
                format!(
                    "Network with name {:?} already exists, every network must have a unique name",
                    network.name
                ),
            ));
        }
        let has_interface = spec
            .domain
            .devices
            .interfaces
            .iter()
            .any(|iface| iface.name == network.name);
        if !has_interface {
            findings.push(Finding::required(
                &name_path,
                not_found_message(&name_path, &network.name),
            ));
        }
    }
    findings
}
