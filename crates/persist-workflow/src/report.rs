//! Device summary shown before confirmation, and the README written to the stick.

use persist_hal::{capture_advisory, CommandSpec, SystemHal};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device: PathBuf,
    pub size_bytes: Option<u64>,
    /// Raw `lsblk` table of the current layout.
    pub layout: Option<String>,
}

impl DeviceSummary {
    pub fn size_gb(&self) -> Option<f64> {
        self.size_bytes
            .map(|b| b as f64 / (1024.0 * 1024.0 * 1024.0))
    }

    pub fn render(&self) -> String {
        let rule = "─".repeat(RULE_WIDTH);
        let mut out = String::new();
        let _ = writeln!(out, "📊 Device information for {}:", self.device.display());
        let _ = writeln!(out, "{rule}");
        if let Some(gb) = self.size_gb() {
            let _ = writeln!(out, "   Size: {gb:.2} GB");
        }
        if let Some(layout) = self.layout.as_deref().filter(|l| !l.trim().is_empty()) {
            let _ = writeln!(out, "\n   Current layout:");
            for line in layout.trim_end().lines() {
                let _ = writeln!(out, "   {line}");
            }
        }
        let _ = write!(out, "{rule}");
        out
    }
}

/// Gather size and current layout of `device`. Both queries are advisory.
pub fn show_device_info(hal: &dyn SystemHal, device: &Path, timeout: Duration) -> DeviceSummary {
    let size_bytes = capture_advisory(
        hal,
        &CommandSpec::new("blockdev")
            .arg("--getsize64")
            .path_arg(device),
        timeout,
    )
    .and_then(|out| out.trim().parse::<u64>().ok());

    let layout = capture_advisory(
        hal,
        &CommandSpec::new("lsblk")
            .args(["-o", "NAME,SIZE,TYPE,MOUNTPOINT"])
            .path_arg(device),
        timeout,
    );

    DeviceSummary {
        device: device.to_path_buf(),
        size_bytes,
        layout,
    }
}

/// Warning block printed right before the confirmation prompt.
pub fn destructive_warning(device: &Path, image: &Path) -> String {
    format!(
        "⚠️  WARNING: This will PERMANENTLY ERASE all data on {dev}\n\n💾 Target: {dev}\n📀 Source: {img}",
        dev = device.display(),
        img = image.display()
    )
}

pub fn success_banner(device: &Path) -> String {
    let rule = "=".repeat(70);
    format!(
        "{rule}\n  ✅ SUCCESS! Persistent USB Created!\n{rule}\n\n\
         📀 Your portable Linux system is ready on {}\n\n\
         💡 How to use:\n   \
         1. Boot from USB\n   \
         2. Select 'Live with Persistence'\n   \
         3. All changes save automatically\n\n\
         📖 Check README.txt on USB for details\n\n\
         ✅ Safe to remove USB now",
        device.display()
    )
}

pub const README_FILE: &str = "README.txt";

pub const README_TEXT: &str = "
═══════════════════════════════════════════════════════════
  BTRFS PERSISTENT USB - PORTABLE LINUX SYSTEM
═══════════════════════════════════════════════════════════

🎯 WHAT IS THIS?
This USB carries a live Linux system that keeps every change,
file and setting across reboots.

🚀 HOW TO USE:
1. Boot from this USB on any computer (UEFI or BIOS)
2. Select \"Live with Persistence\" from the boot menu
3. Use it normally; changes are saved automatically
4. Shut down and take the USB with you
5. Boot on another computer and your session continues

💾 PARTITION LAYOUT:
- Partition 1: EFI System (512MB) - UEFI boot
- Partition 2: Boot (4GB FAT32) - OS files + BIOS boot
- Partition 3: Persistence (rest) - Btrfs with snapshots

🌳 BTRFS FEATURES:
- Transparent zstd compression
- Subvolumes: @rootfs, @home, @snapshots, @work
- Snapshots before risky changes

⚠️  SAFETY:
- Don't remove the USB while the system is running
- Use \"Shut Down\" properly before unplugging

═══════════════════════════════════════════════════════════
";
