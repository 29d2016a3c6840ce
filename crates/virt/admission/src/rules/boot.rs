//! Disk to volume mapping and boot order
//!
//! Boot orders are unique across disks and interfaces. Disks claim their
//! orders first; interface collisions are reported by the network rules
//! through [`BootOrders`].

use super::common::not_found_message;
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use std::collections::BTreeSet;
use virt_types::devices::bus;
use virt_types::{ClusterConfig, VirtualMachineInstanceSpec};

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![Rule::new("boot.disks", 900, disks)]
}

/// Boot orders already claimed by earlier devices
#[derive(Debug, Default)]
pub(crate) struct BootOrders {
    claimed: BTreeSet<u32>,
}

impl BootOrders {
    /// Orders claimed by the disks of a spec
    pub(crate) fn from_disks(spec: &VirtualMachineInstanceSpec) -> Self {
        let mut orders = Self::default();
        for order in spec.domain.devices.disks.iter().filter_map(|d| d.boot_order) {
            orders.claim(order);
        }
        orders
    }

    /// Claim an order, returning false when another device already holds it
    pub(crate) fn claim(&mut self, order: u32) -> bool {
        self.claimed.insert(order)
    }
}

fn disks(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let disks_path = field.children(&["domain", "devices", "disks"]);
    let mut orders = BootOrders::default();
    let mut findings = Vec::new();

    for (idx, disk) in spec.domain.devices.disks.iter().enumerate() {
        let disk_path = disks_path.index(idx);
        let volume = spec.volume(&disk.name);

        match volume {
            None => findings.push(Finding::invalid(
                &disk_path.child("name"),
                not_found_message(&disk_path.child("Name"), &disk.name),
            )),
            Some(volume) => {
                if disk.lun.is_some() && !volume.is_claim_backed() {
                    let lun = disk_path.child("lun");
                    findings.push(Finding::invalid(
                        &lun,
                        format!("{lun} can only be mapped to a DataVolume or PersistentVolumeClaim volume."),
                    ));
                }

                if volume.source.downward_metrics.is_some() {
                    let target = disk_path.child("disk");
                    match &disk.disk {
                        None => findings.push(Finding::required(
                            &target,
                            format!("DownwardMetrics volume must be mapped to a disk, but disk is not set on {target}."),
                        )),
                        Some(target_disk) if !target_disk.bus.is_empty() && target_disk.bus != bus::VIRTIO => {
                            let bus_path = target.child("bus");
                            findings.push(Finding::invalid(
                                &bus_path,
                                format!(
                                    "DownwardMetrics volume must be mapped to virtio bus, but {bus_path} is set to {}",
                                    target_disk.bus
                                ),
                            ));
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        if let Some(order) = disk.boot_order {
            if !orders.claim(order) {
                let order_path = disk_path.child("bootOrder");
                findings.push(Finding::invalid(
                    &order_path,
                    format!("Boot order for {order_path} already set for a different device."),
                ));
            }
        }
    }
    findings
}
