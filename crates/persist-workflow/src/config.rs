//! Provisioning configuration.
//!
//! One `ProvisionConfig` is built by the binary and handed by reference to every component.
//! Tests build it over a temporary mount root with [`Timings::none`].

use crate::preflight::{RequiredTool, REQUIRED_TOOLS};
use persist_hal::{MountSettings, RetryPolicy};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";
pub const PROTECTED_MOUNTS: [&str; 6] = ["/", "/boot", "/boot/efi", "/home", "/usr", "/var"];
pub const SUBVOLUMES: [&str; 4] = ["@rootfs", "@home", "@snapshots", "@work"];
pub const SUBVOLUME_DIRS: [&str; 3] = ["@rootfs/upper", "@rootfs/work", "@home/user"];
pub const PERSIST_MOUNT_OPTIONS: &str = "compress=zstd,noatime";
pub const SMALL_IMAGE_BYTES: u64 = 100 * 1024 * 1024;

/// Mount points used by the pipeline, all under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPaths {
    pub image: PathBuf,
    pub boot: PathBuf,
    pub persist: PathBuf,
    pub esp: PathBuf,
    /// Paths older versions of the tool mounted on; only swept, never mounted.
    pub legacy: Vec<PathBuf>,
}

impl MountPaths {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            image: root.join("iso_temp"),
            boot: root.join("usb_boot"),
            persist: root.join("usb_persist"),
            esp: root.join("esp_temp"),
            legacy: ["iso", "usb", "esp"].iter().map(|n| root.join(n)).collect(),
        }
    }

    pub fn active(&self) -> [&Path; 4] {
        [&self.image, &self.boot, &self.persist, &self.esp]
    }

    /// Everything `unmount_all` sweeps, active paths first.
    pub fn sweep_list(&self) -> Vec<PathBuf> {
        self.active()
            .iter()
            .map(|p| p.to_path_buf())
            .chain(self.legacy.iter().cloned())
            .collect()
    }
}

impl Default for MountPaths {
    fn default() -> Self {
        Self::under(DEFAULT_MOUNT_ROOT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    pub esp_offset_mib: u64,
    pub esp_size_mib: u64,
    pub boot_size_gib: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            esp_offset_mib: 1,
            esp_size_mib: 512,
            boot_size_gib: 4,
        }
    }
}

/// Settle delays and retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub unmount: RetryPolicy,
    pub lazy_settle: Duration,
    pub sweep_settle: Duration,
    /// Before re-mounting a path a previous stage just released.
    pub mount_settle: Duration,
    pub wipe_settle: Duration,
    /// After partition nodes appear and after formatting.
    pub partition_settle: Duration,
    pub partition_wait: RetryPolicy,
    /// Re-issue `partprobe` on every Nth poll of the partition wait.
    pub rescan_every: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            unmount: RetryPolicy::new(3, Duration::from_millis(500)),
            lazy_settle: Duration::from_secs(1),
            sweep_settle: Duration::from_secs(1),
            mount_settle: Duration::from_secs(1),
            wipe_settle: Duration::from_secs(2),
            partition_settle: Duration::from_secs(2),
            partition_wait: RetryPolicy::new(15, Duration::from_secs(1)),
            rescan_every: 3,
        }
    }
}

impl Timings {
    /// Identical retry counts, no sleeping.
    pub fn none() -> Self {
        let defaults = Self::default();
        Self {
            unmount: RetryPolicy::immediate(defaults.unmount.max_attempts),
            lazy_settle: Duration::ZERO,
            sweep_settle: Duration::ZERO,
            mount_settle: Duration::ZERO,
            wipe_settle: Duration::ZERO,
            partition_settle: Duration::ZERO,
            partition_wait: RetryPolicy::immediate(defaults.partition_wait.max_attempts),
            rescan_every: defaults.rescan_every,
        }
    }
}

/// Per-tool time budgets. The bulk copy has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    pub query: Duration,
    pub rescan: Duration,
    pub wipe: Duration,
    pub parted: Duration,
    pub parted_flag: Duration,
    pub mkfs_vfat: Duration,
    pub mkfs_btrfs: Duration,
    pub subvolume: Duration,
    pub sync: Duration,
    pub grub: Duration,
    pub apt_update: Duration,
    pub apt_install: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(10),
            rescan: Duration::from_secs(5),
            wipe: Duration::from_secs(15),
            parted: Duration::from_secs(20),
            parted_flag: Duration::from_secs(10),
            mkfs_vfat: Duration::from_secs(30),
            mkfs_btrfs: Duration::from_secs(60),
            subvolume: Duration::from_secs(15),
            sync: Duration::from_secs(30),
            grub: Duration::from_secs(60),
            apt_update: Duration::from_secs(120),
            apt_install: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub mounts: MountPaths,
    pub layout: LayoutConfig,
    pub timings: Timings,
    pub timeouts: CommandTimeouts,
    pub subvolumes: Vec<String>,
    /// Directories created inside the persistence filesystem, relative to its root.
    pub subvolume_dirs: Vec<PathBuf>,
    pub persist_mount_options: String,
    pub protected_mounts: Vec<PathBuf>,
    pub required_tools: Vec<RequiredTool>,
    pub small_image_bytes: u64,
}

impl ProvisionConfig {
    pub fn new(mount_root: impl AsRef<Path>) -> Self {
        Self {
            mounts: MountPaths::under(mount_root),
            layout: LayoutConfig::default(),
            timings: Timings::default(),
            timeouts: CommandTimeouts::default(),
            subvolumes: SUBVOLUMES.iter().map(|s| s.to_string()).collect(),
            subvolume_dirs: SUBVOLUME_DIRS.iter().map(PathBuf::from).collect(),
            persist_mount_options: PERSIST_MOUNT_OPTIONS.to_string(),
            protected_mounts: PROTECTED_MOUNTS.iter().map(PathBuf::from).collect(),
            required_tools: REQUIRED_TOOLS.to_vec(),
            small_image_bytes: SMALL_IMAGE_BYTES,
        }
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Settings for the HAL mount manager derived from this configuration.
    pub fn mount_settings(&self) -> MountSettings {
        MountSettings {
            retry: self.timings.unmount,
            lazy_settle: self.timings.lazy_settle,
            sweep_settle: self.timings.sweep_settle,
            known_mounts: self.mounts.sweep_list(),
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNT_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_paths_are_rooted() {
        let paths = MountPaths::under("/tmp/persist");
        assert_eq!(paths.boot, PathBuf::from("/tmp/persist/usb_boot"));
        assert_eq!(paths.image, PathBuf::from("/tmp/persist/iso_temp"));

        let sweep = paths.sweep_list();
        assert_eq!(sweep.len(), 7);
        assert_eq!(sweep[0], paths.image);
        assert!(sweep.contains(&PathBuf::from("/tmp/persist/usb")));
    }

    #[test]
    fn default_config_uses_mnt() {
        let cfg = ProvisionConfig::default();
        assert_eq!(cfg.mounts.persist, PathBuf::from("/mnt/usb_persist"));
        assert_eq!(cfg.layout, LayoutConfig::default());
        assert_eq!(cfg.subvolumes, vec!["@rootfs", "@home", "@snapshots", "@work"]);
    }

    #[test]
    fn zero_timings_keep_attempt_counts() {
        let t = Timings::none();
        assert_eq!(t.unmount.max_attempts, 3);
        assert_eq!(t.partition_wait.max_attempts, 15);
        assert!(t.unmount.delay.is_zero());
        assert!(t.partition_settle.is_zero());
    }

    #[test]
    fn mount_settings_sweep_every_known_path() {
        let cfg = ProvisionConfig::new("/tmp/persist").with_timings(Timings::none());
        let settings = cfg.mount_settings();
        assert_eq!(settings.known_mounts, cfg.mounts.sweep_list());
        assert_eq!(settings.retry.max_attempts, 3);
    }
}
