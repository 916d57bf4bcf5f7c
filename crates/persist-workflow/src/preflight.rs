//! Preflight: root privileges and required external tools.

use crate::config::CommandTimeouts;
use crate::errors::ProvisionError;
use log::{info, warn};
use persist_hal::{run_advisory, CommandSpec, HostOps, SystemHal};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTool {
    pub name: &'static str,
    /// Debian packages that provide the tool.
    pub packages: &'static [&'static str],
    /// The run cannot continue without it.
    pub essential: bool,
}

const fn tool(name: &'static str, packages: &'static [&'static str]) -> RequiredTool {
    RequiredTool {
        name,
        packages,
        essential: true,
    }
}

pub const REQUIRED_TOOLS: &[RequiredTool] = &[
    tool("parted", &["parted"]),
    tool("partprobe", &["parted"]),
    tool("wipefs", &["util-linux"]),
    tool("blockdev", &["util-linux"]),
    tool("lsblk", &["util-linux"]),
    tool("mountpoint", &["util-linux"]),
    tool("dd", &["coreutils"]),
    tool("sync", &["coreutils"]),
    tool("mkfs.vfat", &["dosfstools"]),
    tool("mkfs.btrfs", &["btrfs-progs"]),
    tool("btrfs", &["btrfs-progs"]),
    tool("rsync", &["rsync"]),
    tool("mount", &["mount"]),
    tool("umount", &["mount"]),
    tool("fuser", &["psmisc"]),
    RequiredTool {
        name: "grub-install",
        packages: &["grub2-common", "grub-efi-amd64-bin", "grub-pc-bin"],
        essential: false,
    },
];

pub fn check_root<H: HostOps + ?Sized>(hal: &H) -> Result<(), ProvisionError> {
    if !hal.is_root() {
        return Err(ProvisionError::NotRoot);
    }
    Ok(())
}

pub fn missing_tools<'t, H: HostOps + ?Sized>(
    hal: &H,
    tools: &'t [RequiredTool],
) -> Vec<&'t RequiredTool> {
    tools
        .iter()
        .filter(|t| hal.find_executable(t.name).is_none())
        .collect()
}

/// Deduplicated, sorted package list for `tools`.
pub fn packages_for(tools: &[&RequiredTool]) -> Vec<&'static str> {
    tools
        .iter()
        .flat_map(|t| t.packages.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Make sure every essential tool is on `PATH`, installing packages with apt once if not.
pub fn ensure_tools(
    hal: &dyn SystemHal,
    tools: &[RequiredTool],
    timeouts: &CommandTimeouts,
) -> Result<(), ProvisionError> {
    info!("🔍 Checking system requirements...");

    let missing = missing_tools(hal, tools);
    if missing.is_empty() {
        info!("✅ All required tools are installed");
        return Ok(());
    }
    for t in &missing {
        warn!(
            "⚠️  Missing: {} (package: {})",
            t.name,
            t.packages.join(" ")
        );
    }

    info!("📦 Installing missing packages...");
    let packages = packages_for(&missing);
    run_advisory(
        hal,
        &CommandSpec::new("apt-get").args(["update", "-qq"]),
        timeouts.apt_update,
    );
    run_advisory(
        hal,
        &CommandSpec::new("apt-get")
            .args(["install", "-y"])
            .args(packages.iter().copied()),
        timeouts.apt_install,
    );

    let still_missing = missing_tools(hal, tools);
    let fatal: Vec<String> = still_missing
        .iter()
        .filter(|t| t.essential)
        .map(|t| t.name.to_string())
        .collect();
    for t in still_missing.iter().filter(|t| !t.essential) {
        warn!("⚠️  {} still unavailable, continuing without it", t.name);
    }
    if !fatal.is_empty() {
        return Err(ProvisionError::MissingTools(fatal));
    }

    info!("✅ Required tools installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use persist_hal::FakeHal;

    #[test]
    fn root_check_uses_effective_uid() {
        let hal = FakeHal::new();
        assert!(check_root(&hal).is_ok());
        hal.set_root(false);
        assert!(matches!(check_root(&hal), Err(ProvisionError::NotRoot)));
    }

    #[test]
    fn nothing_installed_when_all_present() {
        let hal = FakeHal::new();
        ensure_tools(&hal, REQUIRED_TOOLS, &CommandTimeouts::default()).unwrap();
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn missing_tools_trigger_single_install_with_deduplicated_packages() {
        let hal = FakeHal::new();
        hal.set_missing_executables(&["mkfs.btrfs", "btrfs", "fuser"]);

        // Installing does not make the fake tools appear, so the essential ones stay missing.
        let err = ensure_tools(&hal, REQUIRED_TOOLS, &CommandTimeouts::default()).unwrap_err();
        match err {
            ProvisionError::MissingTools(names) => {
                assert_eq!(names, vec!["mkfs.btrfs", "btrfs", "fuser"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let apt = hal.commands_for("apt-get");
        assert_eq!(apt.len(), 2);
        assert_eq!(apt[0], vec!["update", "-qq"]);
        assert_eq!(apt[1], vec!["install", "-y", "btrfs-progs", "psmisc"]);
    }

    #[test]
    fn missing_grub_is_not_fatal() {
        let hal = FakeHal::new();
        hal.set_missing_executables(&["grub-install"]);
        ensure_tools(&hal, REQUIRED_TOOLS, &CommandTimeouts::default()).unwrap();
        assert_eq!(hal.commands_for("apt-get").len(), 2);
    }
}
