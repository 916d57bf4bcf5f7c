//! Partition Planner: the fixed three-partition layout.
//!
//! ```text
//! | 1 MiB gap | ESP (FAT32) | BOOT (FAT32) | persistence (btrfs, rest of disk) |
//! ```

use crate::config::LayoutConfig;
use persist_hal::{partition_path, CommandSpec};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionRole {
    Esp,
    Boot,
    Persistence,
}

impl PartitionRole {
    /// GPT partition name.
    pub fn gpt_name(&self) -> &'static str {
        match self {
            PartitionRole::Esp => "ESP",
            PartitionRole::Boot => "BOOT",
            PartitionRole::Persistence => "persistence",
        }
    }

    /// File-system type hint passed to `parted mkpart`.
    pub fn fs_hint(&self) -> &'static str {
        match self {
            PartitionRole::Esp | PartitionRole::Boot => "fat32",
            PartitionRole::Persistence => "btrfs",
        }
    }

    /// Flag set on the partition after creation.
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            PartitionRole::Esp => Some("esp"),
            PartitionRole::Boot => Some("boot"),
            PartitionRole::Persistence => None,
        }
    }

    pub fn format_command(&self, node: &Path) -> CommandSpec {
        match self {
            PartitionRole::Esp => vfat("EFI", node),
            PartitionRole::Boot => vfat("BOOT", node),
            PartitionRole::Persistence => CommandSpec::new("mkfs.btrfs")
                .arg("-f")
                .args(["-L", "persistence"])
                .args(["-m", "single"])
                .args(["-d", "single"])
                .path_arg(node),
        }
    }
}

fn vfat(label: &str, node: &Path) -> CommandSpec {
    CommandSpec::new("mkfs.vfat")
        .args(["-F", "32"])
        .args(["-n", label])
        .path_arg(node)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionEnd {
    Mib(u64),
    /// Up to the end of the device.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub number: u32,
    pub role: PartitionRole,
    pub node: PathBuf,
    pub start_mib: u64,
    pub end: PartitionEnd,
}

impl PartitionSpec {
    pub fn size_mib(&self) -> Option<u64> {
        match self.end {
            PartitionEnd::Mib(end) => Some(end.saturating_sub(self.start_mib)),
            PartitionEnd::Full => None,
        }
    }

    pub fn start_arg(&self) -> String {
        format!("{}MiB", self.start_mib)
    }

    pub fn end_arg(&self) -> String {
        match self.end {
            PartitionEnd::Mib(end) => format!("{}MiB", end),
            PartitionEnd::Full => "100%".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    pub device: PathBuf,
    pub esp: PartitionSpec,
    pub boot: PartitionSpec,
    pub persistence: PartitionSpec,
}

impl PartitionLayout {
    pub fn partitions(&self) -> [&PartitionSpec; 3] {
        [&self.esp, &self.boot, &self.persistence]
    }

    pub fn names(&self) -> PartitionNames {
        PartitionNames {
            esp: self.esp.node.clone(),
            boot: self.boot.node.clone(),
            persistence: self.persistence.node.clone(),
        }
    }
}

/// Compute the layout for `device`. The caller guarantees the device is larger than ESP + boot.
///
/// Offsets saturate at `u64::MAX` MiB rather than wrapping.
pub fn compute_layout(device: &Path, cfg: &LayoutConfig) -> PartitionLayout {
    let names = partition_names(device);
    let esp_end = cfg.esp_offset_mib.saturating_add(cfg.esp_size_mib);
    let boot_end = esp_end.saturating_add(cfg.boot_size_gib.saturating_mul(1024));

    PartitionLayout {
        device: device.to_path_buf(),
        esp: PartitionSpec {
            number: 1,
            role: PartitionRole::Esp,
            node: names.esp,
            start_mib: cfg.esp_offset_mib,
            end: PartitionEnd::Mib(esp_end),
        },
        boot: PartitionSpec {
            number: 2,
            role: PartitionRole::Boot,
            node: names.boot,
            start_mib: esp_end,
            end: PartitionEnd::Mib(boot_end),
        },
        persistence: PartitionSpec {
            number: 3,
            role: PartitionRole::Persistence,
            node: names.persistence,
            start_mib: boot_end,
            end: PartitionEnd::Full,
        },
    }
}

/// Device nodes of the three partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    pub esp: PathBuf,
    pub boot: PathBuf,
    pub persistence: PathBuf,
}

impl PartitionNames {
    pub fn all(&self) -> [&Path; 3] {
        [&self.esp, &self.boot, &self.persistence]
    }
}

pub fn partition_names(device: &Path) -> PartitionNames {
    PartitionNames {
        esp: partition_path(device, 1),
        boot: partition_path(device, 2),
        persistence: partition_path(device, 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_documented_offsets() {
        let layout = compute_layout(Path::new("/dev/sdb"), &LayoutConfig::default());

        assert_eq!(layout.esp.start_mib, 1);
        assert_eq!(layout.esp.size_mib(), Some(512));
        assert_eq!(layout.boot.start_mib, 513);
        assert_eq!(layout.boot.size_mib(), Some(4096));
        assert_eq!(layout.persistence.start_mib, 4609);
        assert_eq!(layout.persistence.end, PartitionEnd::Full);
        assert_eq!(layout.persistence.end_arg(), "100%");
    }

    #[test]
    fn oversized_config_saturates_instead_of_wrapping() {
        let cfg = LayoutConfig {
            esp_offset_mib: 1,
            esp_size_mib: u64::MAX - 8,
            boot_size_gib: u64::MAX,
        };
        let layout = compute_layout(Path::new("/dev/sdb"), &cfg);

        assert_eq!(layout.esp.end, PartitionEnd::Mib(u64::MAX - 7));
        assert_eq!(layout.boot.end, PartitionEnd::Mib(u64::MAX));
        assert_eq!(layout.persistence.start_mib, u64::MAX);
        assert!(layout.boot.start_mib < layout.persistence.start_mib);
    }

    #[test]
    fn partitions_are_contiguous() {
        let cfg = LayoutConfig {
            esp_offset_mib: 1,
            esp_size_mib: 256,
            boot_size_gib: 2,
        };
        let layout = compute_layout(Path::new("/dev/sdc"), &cfg);
        assert_eq!(layout.esp.end, PartitionEnd::Mib(layout.boot.start_mib));
        assert_eq!(
            layout.boot.end,
            PartitionEnd::Mib(layout.persistence.start_mib)
        );
        assert_eq!(layout.boot.start_arg(), "257MiB");
        assert_eq!(layout.boot.end_arg(), "2305MiB");
    }

    #[test]
    fn names_follow_device_convention() {
        for dev in ["/dev/sdb", "/dev/vda", "/dev/xvdc"] {
            let names = partition_names(Path::new(dev));
            assert_eq!(names.esp, PathBuf::from(format!("{dev}1")));
            assert_eq!(names.boot, PathBuf::from(format!("{dev}2")));
            assert_eq!(names.persistence, PathBuf::from(format!("{dev}3")));
        }
        for dev in ["/dev/nvme0n1", "/dev/mmcblk0", "/dev/loop7"] {
            let names = partition_names(Path::new(dev));
            assert_eq!(names.esp, PathBuf::from(format!("{dev}p1")));
            assert_eq!(names.persistence, PathBuf::from(format!("{dev}p3")));
        }
    }

    #[test]
    fn layout_nodes_match_names() {
        let layout = compute_layout(Path::new("/dev/nvme0n1"), &LayoutConfig::default());
        assert_eq!(layout.names(), partition_names(Path::new("/dev/nvme0n1")));
    }

    #[test]
    fn format_commands_carry_labels() {
        let esp = PartitionRole::Esp.format_command(Path::new("/dev/sdb1"));
        assert_eq!(esp.to_string(), "mkfs.vfat -F 32 -n EFI /dev/sdb1");

        let persist = PartitionRole::Persistence.format_command(Path::new("/dev/sdb3"));
        assert_eq!(
            persist.to_string(),
            "mkfs.btrfs -f -L persistence -m single -d single /dev/sdb3"
        );
    }
}
