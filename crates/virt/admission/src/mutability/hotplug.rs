//! Storage hotplug policy
//!
//! Volumes, disks and filesystems of a running instance may change only in
//! the ways the hypervisor can apply live: claim-backed volumes come and go
//! as hotplugged disks, CD-ROM media is swapped, and everything that was
//! attached at boot stays as it was.
//!
//! ## Permanent and hotplugged volumes
//!
//! A volume is permanent when the instance reports it without hotplug
//! status. Every other volume, including ones the instance does not report
//! yet, is treated as hotplugged. Memory dump volumes are neither.
//!
//! The policy reports the first problem it finds.

use crate::field::FieldPath;
use crate::finding::Finding;
use crate::lookup::ResourceLookup;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};
use virt_types::devices::bus;
use virt_types::{ClusterConfig, Disk, FeatureGate, VirtualMachineInstance, Volume};

/// Judges storage changes on a running instance
#[async_trait]
pub trait StorageHotplugPolicy: Send + Sync + Debug {
    /// Findings for updating `old` into `new`, with spec paths under `root`
    async fn check(
        &self,
        root: &FieldPath,
        old: &VirtualMachineInstance,
        new: &VirtualMachineInstance,
        config: &ClusterConfig,
    ) -> Vec<Finding>;
}

/// Default storage hotplug policy
#[derive(Debug, Clone)]
pub struct VolumeHotplugPolicy {
    lookup: Arc<dyn ResourceLookup>,
}

struct VolumeSets<'a> {
    permanent: BTreeMap<&'a str, &'a Volume>,
    hotplug: BTreeMap<&'a str, &'a Volume>,
}

impl<'a> VolumeSets<'a> {
    fn split(volumes: &'a [Volume], status: &virt_types::VirtualMachineInstanceStatus) -> Self {
        let mut sets = Self {
            permanent: BTreeMap::new(),
            hotplug: BTreeMap::new(),
        };
        for volume in volumes.iter().filter(|v| !v.is_memory_dump()) {
            let permanent = status
                .volume_status
                .iter()
                .any(|s| s.name == volume.name && s.hotplug_volume.is_none() && s.memory_dump_volume.is_none());
            if permanent {
                sets.permanent.insert(volume.name.as_str(), volume);
            } else {
                sets.hotplug.insert(volume.name.as_str(), volume);
            }
        }
        sets
    }
}

impl VolumeHotplugPolicy {
    pub fn new(lookup: Arc<dyn ResourceLookup>) -> Self {
        Self { lookup }
    }

    /// Storage checks that need no other resource
    pub fn check_storage(
        root: &FieldPath,
        old: &VirtualMachineInstance,
        new: &VirtualMachineInstance,
        config: &ClusterConfig,
    ) -> Option<Finding> {
        let old_spec = &old.spec;
        let new_spec = &new.spec;

        // Ejected CD-ROMs keep their disk without a volume
        let declarative = config.is_enabled(FeatureGate::DeclarativeHotplugVolumes);
        let ejected = |disk: &&Disk| {
            declarative
                && disk.is_cdrom()
                && new_spec.volume(&disk.name).is_none()
                && old_spec.volume(&disk.name).is_some()
        };
        let declared = new_spec.volumes.iter().filter(|v| !v.is_memory_dump()).count();
        let required = new_spec
            .domain
            .devices
            .disks
            .iter()
            .filter(|disk| !ejected(disk))
            .count()
            + new_spec.domain.devices.filesystems.len();
        if declared != required {
            return Some(Finding::invalid(
                root,
                format!("mismatch between volumes declared ({declared}) and required ({required})"),
            ));
        }

        let old_sets = VolumeSets::split(&old_spec.volumes, &old.status);
        let new_sets = VolumeSets::split(&new_spec.volumes, &old.status);

        if old_sets.permanent.len() != new_sets.permanent.len() {
            return Some(Finding::invalid(root, "Number of permanent volumes has changed"));
        }

        for (name, volume) in &new_sets.hotplug {
            if let Some(previous) = old_sets.hotplug.get(name) {
                if previous != volume {
                    return Some(Finding::invalid(root, format!("hotplug volume {name}, changed")));
                }
                if old_spec.disk(name) != new_spec.disk(name) {
                    return Some(Finding::invalid(root, format!("hotplug disk {name}, changed")));
                }
                continue;
            }
            if let Some(finding) = Self::check_added(root, name, volume, old, new) {
                return Some(finding);
            }
        }

        for name in new_sets.permanent.keys() {
            let volume_changed = old_spec.volume(name) != new_spec.volume(name);
            let disk_changed = old_spec.disk(name) != new_spec.disk(name);
            if volume_changed || disk_changed {
                return Some(Finding::invalid(root, format!("permanent disk {name}, changed")));
            }
        }

        None
    }

    fn check_added(
        root: &FieldPath,
        name: &str,
        volume: &Volume,
        old: &VirtualMachineInstance,
        new: &VirtualMachineInstance,
    ) -> Option<Finding> {
        if !volume.is_claim_backed() {
            return Some(Finding::invalid(root, format!("volume {name} is not a PVC or DataVolume")));
        }

        let devices = &new.spec.domain.devices;
        if devices.filesystems.iter().any(|fs| fs.name == name) {
            return None;
        }
        let Some((index, disk)) = devices.disks.iter().enumerate().find(|(_, d)| d.name == name) else {
            return Some(Finding::invalid(root, format!("disk {name} does not exist")));
        };

        // Media inject into an existing CD-ROM drive
        if disk.is_cdrom() && old.spec.disk(name).is_some_and(Disk::is_cdrom) {
            return None;
        }

        if disk.disk.is_none() && disk.lun.is_none() {
            return Some(Finding::invalid(
                root,
                format!("Hotplug configuration for [{name}] requires diskDevice of type 'disk' or 'lun' to be used."),
            ));
        }
        let disk_bus = disk.bus();
        if disk.disk.is_some() && disk_bus != bus::SCSI && disk_bus != bus::VIRTIO {
            return Some(Finding::invalid(
                root,
                format!(
                    "Hotplug configuration for disk [{name}] requires bus to be 'scsi' or 'virtio'. [{disk_bus}] is not permitted."
                ),
            ));
        }
        if disk.lun.is_some() && disk_bus != bus::SCSI {
            return Some(Finding::invalid(
                root,
                format!("Hotplug configuration for LUN [{name}] requires bus to be 'scsi'. [{disk_bus}] is not permitted."),
            ));
        }
        if disk.wants_dedicated_io_thread() && disk_bus != bus::VIRTIO {
            return Some(Finding::invalid(
                root,
                format!("Hotplug configuration for [{name}] requires virtio bus for IOThreads."),
            ));
        }
        if disk.boot_order == Some(0) {
            let field = root.children(&["domain", "devices", "disks"]).index(index);
            return Some(Finding::invalid(
                &field.child("bootOrder"),
                format!("{field} must have a boot order > 0, if supplied"),
            ));
        }
        None
    }

    /// Reject volume changes while the instance migrates
    async fn check_migration(&self, root: &FieldPath, old: &VirtualMachineInstance) -> Option<Finding> {
        let in_progress = "cannot update volumes while a migration of the VMI is in progress";
        if old.is_migrating() {
            return Some(Finding::invalid(root, in_progress));
        }

        let meta = &old.metadata;
        match self.lookup.list_migrations(&meta.namespace, &meta.name).await {
            Ok(migrations) => migrations
                .iter()
                .any(|m| !m.is_final())
                .then(|| Finding::invalid(root, in_progress)),
            Err(err) => {
                warn!(vmi = %meta.name, error = %err, "Migration lookup failed");
                Some(Finding::server_error(root, format!("could not list migrations: {err}")))
            }
        }
    }
}

#[async_trait]
impl StorageHotplugPolicy for VolumeHotplugPolicy {
    async fn check(
        &self,
        root: &FieldPath,
        old: &VirtualMachineInstance,
        new: &VirtualMachineInstance,
        config: &ClusterConfig,
    ) -> Vec<Finding> {
        if let Some(finding) = Self::check_storage(root, old, new, config) {
            debug!(vmi = %new.metadata.name, message = %finding.message, "Storage hotplug rejected");
            return vec![finding];
        }

        if old.spec.volumes != new.spec.volumes {
            if let Some(finding) = self.check_migration(root, old).await {
                return vec![finding];
            }
        }
        Vec::new()
    }
}
