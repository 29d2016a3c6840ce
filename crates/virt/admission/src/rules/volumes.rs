//! Volume sources, container disk paths and access credentials
//!
//! Instance-only checks (volumes consumed by devices, mandatory memory) live
//! in [`instance_rules`]; they do not apply to virtual machine templates.

use super::common::{list_exceeds_limit_message, not_found_message, required_field_message, validate_path, ARRAY_LEN_MAX};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::{BTreeMap, BTreeSet};
use virt_types::volume::{host_disk_type, CloudInitSource};
use virt_types::{AccessCredential, ClusterConfig, Volume, VirtualMachineInstanceSpec};

const CLOUD_INIT_USER_DATA_MAX: usize = 2048;
const CLOUD_INIT_NETWORK_DATA_MAX: usize = 2048;

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("volumes.sources", 1600, volumes),
        Rule::new("volumes.container_disk_paths", 1610, container_disk_paths),
        Rule::new("volumes.access_credentials", 1620, access_credentials),
    ]
}

/// Rules for standalone instances only
pub fn instance_rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("instance.volumes_consumed", 100, volumes_consumed),
        Rule::new("instance.memory_requested", 200, memory_requested),
    ]
}

/// Which data a cloud-init source carries
struct CloudInitData<'a> {
    kind: &'static str,
    inline: &'a str,
    base64: &'a str,
    secret_set: bool,
    limit: usize,
}

impl CloudInitData<'_> {
    /// Findings for one data kind, and whether any source was given
    fn check(&self, path: &FieldPath) -> (Vec<Finding>, bool) {
        let mut findings = Vec::new();
        let mut sources = usize::from(self.secret_set);
        let mut len = 0;

        if !self.base64.is_empty() {
            sources += 1;
            let field = path.child(if self.kind == "userdata" {
                "userDataBase64"
            } else {
                "networkDataBase64"
            });
            match STANDARD.decode(self.base64) {
                Ok(decoded) => len = decoded.len(),
                Err(_) => findings.push(Finding::invalid(
                    &field,
                    format!("{field} is not a valid base64 value."),
                )),
            }
        }
        if !self.inline.is_empty() {
            sources += 1;
            len = self.inline.len();
        }

        if sources > 1 {
            let source = if self.kind == "userdata" {
                "userdatasource"
            } else {
                "networkdata source"
            };
            findings.push(Finding::invalid(
                path,
                format!("{path} must have only one {source} set."),
            ));
        }
        if len > self.limit {
            let secret_ref = if self.kind == "userdata" {
                "UserDataSecretRef"
            } else {
                "NetworkDataSecretRef"
            };
            findings.push(Finding::invalid(
                path,
                format!(
                    "{path} {} exceeds {} byte limit. Should use {secret_ref} for larger data.",
                    self.kind, self.limit
                ),
            ));
        }
        (findings, sources > 0)
    }
}

fn cloud_init(path: &FieldPath, source: &CloudInitSource) -> Vec<Finding> {
    let user = CloudInitData {
        kind: "userdata",
        inline: &source.user_data,
        base64: &source.user_data_base64,
        secret_set: source.secret_ref.as_ref().is_some_and(|r| !r.name.is_empty()),
        limit: CLOUD_INIT_USER_DATA_MAX,
    };
    let network = CloudInitData {
        kind: "networkdata",
        inline: &source.network_data,
        base64: &source.network_data_base64,
        secret_set: source
            .network_data_secret_ref
            .as_ref()
            .is_some_and(|r| !r.name.is_empty()),
        limit: CLOUD_INIT_NETWORK_DATA_MAX,
    };

    let (mut findings, has_user) = user.check(path);
    let (network_findings, has_network) = network.check(path);
    findings.extend(network_findings);

    if !has_user && !has_network {
        findings.push(Finding::invalid(
            path,
            format!("{path} must have at least one userdatasource or one networkdatasource set."),
        ));
    }
    findings
}

fn volume_source(path: &FieldPath, volume: &Volume, config: &ClusterConfig) -> Vec<Finding> {
    let source = &volume.source;
    let mut findings = Vec::new();

    if let Some(data_volume) = &source.data_volume {
        if !config.data_volume_api_present {
            findings.push(Finding::invalid(
                path,
                "DataVolume api is not present in cluster. CDI must be installed for DataVolume support.",
            ));
        }
        if data_volume.name.is_empty() {
            findings.push(Finding::required(&path.child("name"), "DataVolume 'name' must be set"));
        }
    }

    if source.count() != 1 {
        findings.push(Finding::invalid(
            path,
            format!("{path} must have exactly one source type set"),
        ));
    }

    if let Some(no_cloud) = &source.cloud_init_no_cloud {
        findings.extend(cloud_init(&path.child("cloudInitNoCloud"), no_cloud));
    } else if let Some(config_drive) = &source.cloud_init_config_drive {
        findings.extend(cloud_init(&path.child("cloudInitConfigDrive"), config_drive));
    }

    if let Some(host_disk) = &source.host_disk {
        let host_path = path.child("hostDisk");
        let type_path = host_path.child("type");
        if host_disk.path.is_empty() {
            let p = host_path.child("path");
            findings.push(Finding::invalid(&p, format!("{p} is required for hostDisk volume")));
        }
        if host_disk.disk_type != host_disk_type::DISK && host_disk.disk_type != host_disk_type::DISK_OR_CREATE {
            findings.push(Finding::invalid(
                &type_path,
                format!(
                    "{type_path} has invalid value '{}', allowed are '{}' or '{}'",
                    host_disk.disk_type,
                    host_disk_type::DISK,
                    host_disk_type::DISK_OR_CREATE
                ),
            ));
        }
        if host_disk.disk_type == host_disk_type::DISK
            && host_disk.capacity.as_ref().is_some_and(|c| !c.is_zero())
        {
            let capacity_path = host_path.child("capacity");
            findings.push(Finding::invalid(
                &capacity_path,
                format!(
                    "{capacity_path} is allowed to pass only with {type_path} equal to '{}'",
                    host_disk_type::DISK_OR_CREATE
                ),
            ));
        }
    }

    let named_refs = [
        (
            source.config_map.as_ref().map(|c| c.name.is_empty()),
            ["configMap", "name"],
        ),
        (
            source.secret.as_ref().map(|s| s.secret_name.is_empty()),
            ["secret", "secretName"],
        ),
        (
            source
                .service_account
                .as_ref()
                .map(|s| s.service_account_name.is_empty()),
            ["serviceAccount", "serviceAccountName"],
        ),
    ];
    for (_, segments) in named_refs.iter().filter(|(empty, _)| *empty == Some(true)) {
        let p = path.children(segments);
        findings.push(Finding::invalid(&p, required_field_message(&p)));
    }
    findings
}

fn volumes(field: &FieldPath, spec: &VirtualMachineInstanceSpec, config: &ClusterConfig) -> Vec<Finding> {
    let volumes_path = field.child("volumes");
    let mut first_seen: BTreeMap<&str, usize> = BTreeMap::new();
    let mut findings = Vec::new();

    for (idx, volume) in spec.volumes.iter().enumerate() {
        let path = volumes_path.index(idx);
        if let Some(&other) = first_seen.get(volume.name.as_str()) {
            findings.push(Finding::duplicate(
                &path.child("name"),
                format!("{path} and {} must not have the same Name.", volumes_path.index(other)),
            ));
        } else {
            first_seen.insert(volume.name.as_str(), idx);
        }
        findings.extend(volume_source(&path, volume, config));
    }

    let singletons = [
        (
            spec.volumes.iter().filter(|v| v.source.service_account.is_some()).count(),
            "serviceAccount volume",
        ),
        (
            spec.volumes.iter().filter(|v| v.source.downward_metrics.is_some()).count(),
            "downwardMetric volume",
        ),
        (
            spec.volumes.iter().filter(|v| v.is_memory_dump()).count(),
            "memory dump volume",
        ),
    ];
    for (_, what) in singletons.iter().filter(|(count, _)| *count > 1) {
        findings.push(Finding::invalid(
            &volumes_path,
            format!("{volumes_path} must have max one {what} set"),
        ));
    }
    findings
}

fn container_disk_paths(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let volumes_path = field.child("volumes");
    spec.volumes
        .iter()
        .enumerate()
        .filter_map(|(idx, v)| {
            v.source
                .container_disk
                .as_ref()
                .filter(|c| !c.path.is_empty())
                .map(|c| (idx, c.path.as_str()))
        })
        .flat_map(|(idx, path)| validate_path(&volumes_path.index(idx).child("containerDisk"), path))
        .collect()
}

fn ssh_public_key(path: &FieldPath, credential: &AccessCredential, spec: &VirtualMachineInstanceSpec) -> Vec<Finding> {
    let Some(ssh) = &credential.ssh_public_key else {
        return Vec::new();
    };
    let ssh_path = path.child("sshPublicKey");
    let method_path = ssh_path.child("propagationMethod");
    let method = &ssh.propagation_method;
    let mut findings = Vec::new();
    let mut methods = 0;

    if method.no_cloud.is_some() {
        methods += 1;
        if !spec.volumes.iter().any(|v| v.source.cloud_init_no_cloud.is_some()) {
            findings.push(Finding::invalid(
                &method_path,
                format!("{path} requires a noCloud volume to exist when the noCloud propagationMethod is in use."),
            ));
        }
    }
    if method.config_drive.is_some() {
        methods += 1;
        if !spec.volumes.iter().any(|v| v.source.cloud_init_config_drive.is_some()) {
            findings.push(Finding::invalid(
                &method_path,
                format!("{path} requires a configDrive volume to exist when the configDrive propagationMethod is in use."),
            ));
        }
    }
    if let Some(agent) = &method.qemu_guest_agent {
        methods += 1;
        if agent.users.is_empty() {
            findings.push(Finding::invalid(
                &method_path.children(&["qemuGuestAgent", "users"]),
                format!("{path} requires at least one user to be present in the users list"),
            ));
        }
    }

    if ssh.source.secret.is_none() {
        findings.push(Finding::invalid(
            &ssh_path.child("source"),
            format!("{path} must have exactly one source set"),
        ));
    }
    if methods != 1 {
        findings.push(Finding::invalid(
            &method_path,
            format!("{path} must have exactly one propagationMethod set"),
        ));
    }
    findings
}

fn access_credentials(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let credentials_path = field.child("accessCredentials");
    if spec.access_credentials.len() > ARRAY_LEN_MAX {
        return vec![Finding::invalid(
            &credentials_path,
            list_exceeds_limit_message(&credentials_path),
        )];
    }

    let mut findings = Vec::new();
    for (idx, credential) in spec.access_credentials.iter().enumerate() {
        let path = credentials_path.index(idx);
        findings.extend(ssh_public_key(&path, credential, spec));

        if let Some(password) = &credential.user_password {
            let password_path = path.child("userPassword");
            if password.source.secret.is_none() {
                findings.push(Finding::invalid(
                    &password_path.child("source"),
                    format!("{path} must have exactly one source set"),
                ));
            }
            if password.propagation_method.qemu_guest_agent.is_none() {
                findings.push(Finding::invalid(
                    &password_path.child("propagationMethod"),
                    format!("{path} must have exactly one propagationMethod set"),
                ));
            }
        }

        let types = usize::from(credential.ssh_public_key.is_some()) + usize::from(credential.user_password.is_some());
        if types != 1 {
            findings.push(Finding::invalid(
                &path,
                format!("{path} must have exactly one access credential type set"),
            ));
        }
    }
    findings
}

/// Every volume except memory dumps is used by a disk or filesystem
fn volumes_consumed(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let devices = &spec.domain.devices;
    let consumers: BTreeSet<&str> = devices
        .disks
        .iter()
        .map(|d| d.name.as_str())
        .chain(devices.filesystems.iter().map(|fs| fs.name.as_str()))
        .collect();

    let volumes_path = field.children(&["domain", "volumes"]);
    spec.volumes
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_memory_dump() && !consumers.contains(v.name.as_str()))
        .map(|(idx, v)| {
            let name_path = volumes_path.index(idx).child("name");
            Finding::invalid(&name_path, not_found_message(&name_path, &v.name))
        })
        .collect()
}

fn memory_requested(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let requested = spec.domain.resources.memory_request().value() != 0;
    let sized = spec
        .domain
        .memory
        .as_ref()
        .is_some_and(|m| m.guest.is_some() || m.hugepages.is_some());
    if requested || sized {
        return Vec::new();
    }

    vec![Finding::required(
        &field.children(&["domain", "resources", "requests", "memory"]),
        format!(
            "no memory requested, at least one of '{}', '{}' or '{}' must be set",
            field.children(&["domain", "memory", "guest"]),
            field.children(&["domain", "memory", "hugepages", "size"]),
            field.children(&["domain", "resources", "requests", "memory"]),
        ),
    )]
}
