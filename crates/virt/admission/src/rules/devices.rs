//! Input, sound and disk devices

use super::common::{dns1123_label_errors, is_pci_address, is_serial_charset, MAX_STR_LEN};
use super::Rule;
use crate::field::FieldPath;
use crate::finding::Finding;
use std::collections::BTreeMap;
use virt_types::devices::{bus, CustomBlockSize};
use virt_types::{ClusterConfig, Disk, VirtualMachineInstanceSpec};

const INPUT_BUSES: &[&str] = &[bus::VIRTIO, bus::USB, ""];
const INPUT_TYPE_TABLET: &str = "tablet";
const SOUND_MODELS: &[&str] = &["ich9", "ac97", ""];

const DISK_BUSES: &[&str] = &[bus::VIRTIO, bus::SCSI, bus::SATA, bus::USB];
const CACHE_MODES: &[&str] = &["none", "writethrough", "writeback"];
const IO_MODES: &[&str] = &["native", "threads"];
const ERROR_POLICIES: &[&str] = &["stop", "ignore", "report", "enospace"];

const BLOCK_SIZE_MIN: u32 = 512;
const BLOCK_SIZE_MAX: u32 = 2 * 1024 * 1024;

pub fn rules() -> Vec<Rule<VirtualMachineInstanceSpec>> {
    vec![
        Rule::new("devices.inputs", 1300, inputs),
        Rule::new("devices.disks", 1500, disks),
        Rule::new("devices.sound", 1830, sound),
    ]
}

fn inputs(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let inputs_path = field.children(&["domain", "devices", "inputs"]);
    let mut findings = Vec::new();

    for (idx, input) in spec.domain.devices.inputs.iter().enumerate() {
        let path = inputs_path.index(idx);
        if !INPUT_BUSES.contains(&input.bus.as_str()) {
            findings.push(Finding::invalid(
                &path.child("bus"),
                "Input device can have only virtio or usb bus.",
            ));
        }
        if input.input_type != INPUT_TYPE_TABLET {
            findings.push(Finding::invalid(
                &path.child("type"),
                "Input device can have only tablet type.",
            ));
        }
    }
    findings
}

fn sound(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let Some(device) = &spec.domain.devices.sound else {
        return Vec::new();
    };
    let path = field.children(&["domain", "devices", "sound"]);
    let mut findings = Vec::new();
    if !SOUND_MODELS.contains(&device.model.as_str()) {
        findings.push(Finding::invalid(
            &path,
            "Sound device type is not supported. Options: 'ich9' or 'ac97'",
        ));
    }
    if device.name.is_empty() {
        findings.push(Finding::invalid(&path, "Sound device requires a name field."));
    }
    findings
}

/// Name of the target type set on a disk, matching [`Disk::bus`]
fn target_name(disk: &Disk) -> &'static str {
    if disk.disk.is_some() {
        "disk"
    } else if disk.lun.is_some() {
        "lun"
    } else {
        "cdrom"
    }
}

fn block_size_problem(size: u32) -> Option<String> {
    if size < BLOCK_SIZE_MIN {
        Some(format!(
            "Provided size of {size} is less than the supported minimum size of {BLOCK_SIZE_MIN}"
        ))
    } else if size > BLOCK_SIZE_MAX {
        Some(format!(
            "Provided size of {size} is greater than the supported maximum size of 2 MiB"
        ))
    } else if !size.is_power_of_two() {
        Some(format!("Provided size of {size} is not a power of 2"))
    } else {
        None
    }
}

fn custom_block_size(path: &FieldPath, custom: &CustomBlockSize) -> Vec<Finding> {
    let logical_path = path.child("logical");
    if custom.logical > custom.physical {
        return vec![Finding::invalid(
            &logical_path,
            format!(
                "Logical size {} must be the same or less than the physical size of {}",
                custom.logical, custom.physical
            ),
        )];
    }
    [(logical_path, custom.logical), (path.child("physical"), custom.physical)]
        .into_iter()
        .filter_map(|(p, size)| block_size_problem(size).map(|msg| Finding::invalid(&p, msg)))
        .collect()
}

fn disk_bus(disk_path: &FieldPath, disk: &Disk) -> Vec<Finding> {
    let bus_name = disk.bus();
    if bus_name.is_empty() {
        return Vec::new();
    }
    let bus_path = disk_path.children(&[target_name(disk), "bus"]);
    let mut findings = Vec::new();

    if bus_name == bus::IDE {
        findings.push(Finding::invalid(&bus_path, "IDE bus is not supported"));
    } else {
        if !DISK_BUSES.contains(&bus_name) {
            findings.push(Finding::invalid(
                &bus_path,
                format!(
                    "{disk_path} is set with an unrecognized bus {bus_name}, must be one of: [{}]",
                    DISK_BUSES.join(" ")
                ),
            ));
        }
        if disk.is_cdrom() && disk.disk.is_none() && disk.lun.is_none() && bus_name == bus::VIRTIO {
            findings.push(Finding::invalid(
                &disk_path.children(&["cdrom", "bus"]),
                format!("Bus type {bus_name} is invalid for CD-ROM device"),
            ));
        }
        if disk
            .disk
            .as_ref()
            .is_some_and(|d| d.bus == bus::SATA && d.read_only)
        {
            findings.push(Finding::invalid(
                &disk_path.children(&["disk", "bus"]),
                format!("{bus_name} hard-disks do not support read-only."),
            ));
        }
    }

    if disk.wants_dedicated_io_thread() && disk.disk.as_ref().is_some_and(|d| d.bus == bus::SATA) {
        findings.push(Finding::not_supported(
            disk_path,
            "IOThreads are not supported for disks on a SATA bus",
        ));
    }
    findings
}

fn disks(field: &FieldPath, spec: &VirtualMachineInstanceSpec, _: &ClusterConfig) -> Vec<Finding> {
    let disks_path = field.children(&["domain", "devices", "disks"]);
    let mut first_seen: BTreeMap<&str, usize> = BTreeMap::new();
    let mut findings = Vec::new();

    for (idx, disk) in spec.domain.devices.disks.iter().enumerate() {
        let disk_path = disks_path.index(idx);
        let name_path = disk_path.child("name");

        if let Some(&other) = first_seen.get(disk.name.as_str()) {
            findings.push(Finding::duplicate(
                &name_path,
                format!(
                    "{disk_path} and {} must not have the same Name.",
                    disks_path.index(other)
                ),
            ));
        } else {
            first_seen.insert(disk.name.as_str(), idx);
        }

        if disk.target_count() > 1 {
            findings.push(Finding::invalid(
                &disk_path,
                format!("{disk_path} can only have a single target type defined"),
            ));
        }

        if let Some(target) = disk.disk.as_ref().filter(|d| !d.pci_address.is_empty()) {
            let pci_path = disk_path.children(&["disk", "pciAddress"]);
            if target.bus != bus::VIRTIO {
                findings.push(Finding::invalid(
                    &pci_path,
                    format!("disk {name_path} - setting a PCI address is only possible with bus type virtio."),
                ));
            }
            if !is_pci_address(&target.pci_address) {
                findings.push(Finding::invalid(
                    &pci_path,
                    format!(
                        "disk {name_path} has malformed PCI address ({}).",
                        target.pci_address
                    ),
                ));
            }
        }

        if disk.boot_order == Some(0) {
            findings.push(Finding::invalid(
                &disk_path.child("bootOrder"),
                format!("{disk_path} must have a boot order > 0, if supplied"),
            ));
        }

        findings.extend(disk_bus(&disk_path, disk));

        if let Some(serial) = disk.serial.as_deref().filter(|s| !s.is_empty()) {
            let serial_path = disk_path.child("serial");
            if !is_serial_charset(serial) {
                findings.push(Finding::invalid(
                    &serial_path,
                    format!("{disk_path} must be made up of the following characters [A-Za-z0-9_.+-], if specified"),
                ));
            }
            if serial.chars().count() > MAX_STR_LEN {
                findings.push(Finding::invalid(
                    &serial_path,
                    format!("{disk_path} must be less than or equal to {MAX_STR_LEN} in length, if specified"),
                ));
            }
        }

        if let Some(cache) = disk.cache.as_deref().filter(|c| !c.is_empty()) {
            if !CACHE_MODES.contains(&cache) {
                let cache_path = disk_path.child("cache");
                findings.push(Finding::invalid(
                    &cache_path,
                    format!("{cache_path} has invalid value {cache}"),
                ));
            }
        }

        if let Some(io) = disk.io.as_deref().filter(|io| !io.is_empty()) {
            if !IO_MODES.contains(&io) {
                let io_path = disk_path.child("io");
                findings.push(Finding::not_supported(
                    &io_path,
                    format!("Disk IO mode for {io_path} is not supported. Supported modes are: native, threads."),
                ));
            }
        }

        if let Some(policy) = disk.error_policy.as_deref() {
            if !ERROR_POLICIES.contains(&policy) {
                let policy_path = disk_path.child("errorPolicy");
                findings.push(Finding::invalid(
                    &policy_path,
                    format!("{policy_path} has invalid value {policy:?}"),
                ));
            }
        }

        findings.extend(
            dns1123_label_errors(&disk.name)
                .into_iter()
                .map(|msg| Finding::invalid(&name_path, msg)),
        );

        if let Some(block_size) = &disk.block_size {
            let block_path = disk_path.child("blockSize");
            let matching = block_size
                .match_volume
                .as_ref()
                .is_some_and(|m| m.is_enabled());
            match &block_size.custom {
                Some(_) if matching => findings.push(Finding::invalid(
                    &block_path,
                    "Block size matching can't be enabled together with a custom value",
                )),
                Some(custom) => findings.extend(custom_block_size(&block_path.child("custom"), custom)),
                None => {}
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::FindingKind;
    use virt_types::devices::{BlockSize, CdRomTarget, LunTarget};
    use virt_types::{Input, SoundDevice};

    fn with_disks(disks: Vec<Disk>) -> VirtualMachineInstanceSpec {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.devices.disks = disks;
        spec
    }

    fn check(disks_list: Vec<Disk>) -> Vec<Finding> {
        disks(&FieldPath::root(), &with_disks(disks_list), &ClusterConfig::default())
    }

    #[test]
    fn test_duplicate_disk_name_reported_once() {
        let findings = check(vec![
            Disk::new("testdisk", bus::VIRTIO),
            Disk::new("testdisk", bus::VIRTIO),
        ]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::Duplicate);
        assert_eq!(findings[0].field.to_string(), "domain.devices.disks[1].name");
        assert_eq!(
            findings[0].message,
            "domain.devices.disks[1] and domain.devices.disks[0] must not have the same Name."
        );
    }

    #[test]
    fn test_single_target() {
        let mut disk = Disk::new("both", bus::VIRTIO);
        disk.lun = Some(LunTarget {
            bus: bus::SCSI.into(),
            ..Default::default()
        });
        let findings = check(vec![disk]);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].message,
            "domain.devices.disks[0] can only have a single target type defined"
        );
    }

    #[test]
    fn test_bus_rules() {
        let ide = Disk::new("ide", bus::IDE);
        let bogus = Disk::new("bogus", "floppy");
        let cdrom = Disk {
            name: "cd".into(),
            cdrom: Some(CdRomTarget {
                bus: bus::VIRTIO.into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut sata = Disk::new("sata", bus::SATA);
        if let Some(target) = sata.disk.as_mut() {
            target.read_only = true;
        }
        sata.dedicated_io_thread = Some(true);

        let findings = check(vec![ide, bogus, cdrom, sata]);
        let fields: Vec<_> = findings.iter().map(|f| f.field.to_string()).collect();
        assert_eq!(
            fields,
            [
                "domain.devices.disks[0].disk.bus",
                "domain.devices.disks[1].disk.bus",
                "domain.devices.disks[2].cdrom.bus",
                "domain.devices.disks[3].disk.bus",
                "domain.devices.disks[3]",
            ]
        );
        assert_eq!(findings[0].message, "IDE bus is not supported");
        assert_eq!(findings[4].kind, FindingKind::NotSupported);
    }

    #[test]
    fn test_pci_address_only_on_virtio() {
        let mut disk = Disk::new("pci", bus::SCSI);
        if let Some(target) = disk.disk.as_mut() {
            target.pci_address = "0000:81:01.0".into();
        }
        let findings = check(vec![disk]);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("only possible with bus type virtio"));
    }

    #[test]
    fn test_serial_cache_io_and_error_policy() {
        let mut disk = Disk::new("root", bus::VIRTIO);
        disk.serial = Some("bad serial".into());
        disk.cache = Some("unsafe".into());
        disk.io = Some("default".into());
        disk.error_policy = Some("panic".into());
        disk.boot_order = Some(0);

        let findings = check(vec![disk]);
        let kinds: Vec<_> = findings.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            [
                FindingKind::Invalid,
                FindingKind::Invalid,
                FindingKind::Invalid,
                FindingKind::NotSupported,
                FindingKind::Invalid,
            ]
        );
        assert_eq!(
            findings[4].message,
            "domain.devices.disks[0].errorPolicy has invalid value \"panic\""
        );
    }

    #[test]
    fn test_disk_name_must_be_dns_label() {
        let findings = check(vec![Disk::new("Root_Disk", bus::VIRTIO)]);
        assert!(!findings.is_empty());
        assert!(findings
            .iter()
            .all(|f| f.field.to_string() == "domain.devices.disks[0].name"));
    }

    #[test]
    fn test_block_size() {
        let mut disk = Disk::new("root", bus::VIRTIO);
        disk.block_size = Some(BlockSize {
            custom: Some(CustomBlockSize {
                logical: 1000,
                physical: 4096,
            }),
            match_volume: None,
        });
        let findings = check(vec![disk.clone()]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, "Provided size of 1000 is not a power of 2");

        disk.block_size = Some(BlockSize {
            custom: Some(CustomBlockSize {
                logical: 4096,
                physical: 512,
            }),
            match_volume: None,
        });
        let findings = check(vec![disk]);
        assert_eq!(
            findings[0].field.to_string(),
            "domain.devices.disks[0].blockSize.custom.logical"
        );
    }

    #[test]
    fn test_inputs() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.devices.inputs = vec![
            Input {
                name: "tablet".into(),
                bus: bus::USB.into(),
                input_type: "tablet".into(),
            },
            Input {
                name: "keyboard".into(),
                bus: "ps2".into(),
                input_type: "keyboard".into(),
            },
        ];
        let findings = inputs(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].field.to_string(), "domain.devices.inputs[1].bus");
        assert_eq!(findings[1].field.to_string(), "domain.devices.inputs[1].type");
    }

    #[test]
    fn test_sound() {
        let mut spec = VirtualMachineInstanceSpec::default();
        spec.domain.devices.sound = Some(SoundDevice {
            name: String::new(),
            model: "sb16".into(),
        });
        let findings = sound(&FieldPath::root(), &spec, &ClusterConfig::default());
        assert_eq!(findings.len(), 2);

        spec.domain.devices.sound = Some(SoundDevice {
            name: "audio".into(),
            model: "ich9".into(),
        });
        assert!(sound(&FieldPath::root(), &spec, &ClusterConfig::default()).is_empty());
    }
}
