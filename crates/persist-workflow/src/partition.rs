//! Partitioning and formatting commands for a computed [`PartitionLayout`].

use crate::cancel::CancelFlag;
use crate::config::ProvisionConfig;
use crate::layout::{PartitionLayout, PartitionNames, PartitionRole};
use anyhow::{Context, Result};
use log::{info, warn};
use persist_hal::retry::pause;
use persist_hal::{run_advisory, run_best_effort, run_required, CommandSpec, SystemHal};
use std::path::Path;

/// Destructive steps check the cancel flag first, so an interrupt never starts another one.
pub struct PartitionPlanner<'a> {
    hal: &'a dyn SystemHal,
    config: &'a ProvisionConfig,
    cancel: &'a CancelFlag,
}

impl<'a> PartitionPlanner<'a> {
    pub fn new(
        hal: &'a dyn SystemHal,
        config: &'a ProvisionConfig,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            hal,
            config,
            cancel,
        }
    }

    fn checkpoint(&self) -> Result<()> {
        Ok(self.cancel.check()?)
    }

    /// Wipe old signatures and write the GPT layout, then wait for the kernel to expose it.
    pub fn create_partitions(&self, layout: &PartitionLayout) -> Result<()> {
        let device = layout.device.as_path();
        let t = &self.config.timeouts;
        info!("💽 Creating partition layout on {}...", device.display());

        self.checkpoint()?;
        self.wipe_signatures(device);

        self.checkpoint()?;
        info!("📋 Creating GPT partition table...");
        run_required(self.hal, &parted(device).args(["mklabel", "gpt"]), t.parted)
            .context("Failed to create GPT partition table")?;

        for part in layout.partitions() {
            self.checkpoint()?;
            info!(
                "📦 Creating {} partition ({} -> {})...",
                part.role.gpt_name(),
                part.start_arg(),
                part.end_arg()
            );
            let mkpart = parted(device)
                .args(["-a", "optimal"])
                .arg("mkpart")
                .arg(part.role.gpt_name())
                .arg(part.role.fs_hint())
                .arg(part.start_arg())
                .arg(part.end_arg());
            run_required(self.hal, &mkpart, t.parted)
                .with_context(|| format!("Failed to create partition {}", part.number))?;

            if let Some(flag) = part.role.flag() {
                let set = parted(device)
                    .arg("set")
                    .arg(part.number.to_string())
                    .arg(flag)
                    .arg("on");
                run_required(self.hal, &set, t.parted_flag).with_context(|| {
                    format!("Failed to set {} flag on partition {}", flag, part.number)
                })?;
            }
        }

        self.wait_for_partitions(device, &layout.names());
        self.checkpoint()
    }

    fn wipe_signatures(&self, device: &Path) {
        let t = &self.config.timeouts;
        info!("🧹 Wiping existing signatures...");
        run_advisory(
            self.hal,
            &CommandSpec::new("wipefs").arg("-af").path_arg(device),
            t.wipe,
        );
        run_advisory(
            self.hal,
            &CommandSpec::new("dd")
                .arg("if=/dev/zero")
                .arg(format!("of={}", device.display()))
                .args(["bs=1M", "count=10", "conv=notrunc"]),
            t.wipe,
        );
        pause(self.config.timings.wipe_settle);
    }

    /// Poll until all three partition nodes exist, re-probing periodically.
    ///
    /// Returns false (after a warning) if they never all appear; some environments still let
    /// the following steps succeed.
    pub fn wait_for_partitions(&self, device: &Path, names: &PartitionNames) -> bool {
        let t = &self.config.timeouts;
        let timings = &self.config.timings;
        info!("⏳ Waiting for kernel to recognize new partitions...");

        run_advisory(
            self.hal,
            &CommandSpec::new("partprobe").path_arg(device),
            t.query,
        );
        run_advisory(
            self.hal,
            &CommandSpec::new("blockdev")
                .arg("--rereadpt")
                .path_arg(device),
            t.query,
        );

        let every = timings.rescan_every.max(1);
        let found = timings.partition_wait.poll_until(|attempt| {
            if self.cancel.is_cancelled() {
                return true;
            }
            if names.all().iter().all(|p| self.hal.path_exists(p)) {
                return true;
            }
            if attempt.index % every == 0 {
                run_best_effort(
                    self.hal,
                    &CommandSpec::new("partprobe").path_arg(device),
                    t.rescan,
                );
            }
            false
        });

        if self.cancel.is_cancelled() {
            return false;
        }
        if found {
            info!(
                "✅ Partitions detected: {}, {}, {}",
                names.esp.display(),
                names.boot.display(),
                names.persistence.display()
            );
            pause(timings.partition_settle);
        } else {
            warn!("⚠️  Partition detection timeout, continuing anyway...");
        }
        found
    }

    /// Format each partition, unmounting it first in case something auto-mounted it.
    pub fn format_partitions(&self, layout: &PartitionLayout) -> Result<()> {
        let t = &self.config.timeouts;
        info!("💾 Formatting partitions...");

        for part in layout.partitions() {
            run_best_effort(
                self.hal,
                &CommandSpec::new("umount").path_arg(&part.node),
                t.rescan,
            );
            pause(self.config.timings.mount_settle);
            self.checkpoint()?;

            let budget = match part.role {
                PartitionRole::Persistence => t.mkfs_btrfs,
                _ => t.mkfs_vfat,
            };
            info!("   Formatting {} ({})", part.node.display(), part.role.gpt_name());
            run_required(self.hal, &part.role.format_command(&part.node), budget)
                .with_context(|| format!("Failed to format {}", part.node.display()))?;
        }

        pause(self.config.timings.partition_settle);
        info!("✅ Partitions created and formatted!");
        Ok(())
    }
}

fn parted(device: &Path) -> CommandSpec {
    CommandSpec::new("parted").arg("-s").path_arg(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timings;
    use crate::errors::ProvisionError;
    use crate::layout::compute_layout;
    use persist_hal::{FakeHal, ProcessResult};

    fn config() -> ProvisionConfig {
        ProvisionConfig::new("/tmp/persist-usb-test").with_timings(Timings::none())
    }

    fn fake_disk() -> FakeHal {
        FakeHal::new()
            .with_block_device("/dev/sdx")
            .with_block_device("/dev/sdx1")
            .with_block_device("/dev/sdx2")
            .with_block_device("/dev/sdx3")
    }

    #[test]
    fn create_partitions_issues_gpt_layout() {
        let hal = fake_disk();
        let cfg = config();
        let layout = compute_layout(Path::new("/dev/sdx"), &cfg.layout);

        PartitionPlanner::new(&hal, &cfg, &CancelFlag::new())
            .create_partitions(&layout)
            .unwrap();

        let lines = hal.command_lines();
        let parted: Vec<&String> = lines.iter().filter(|l| l.starts_with("parted")).collect();
        assert_eq!(
            parted,
            vec![
                "parted -s /dev/sdx mklabel gpt",
                "parted -s /dev/sdx -a optimal mkpart ESP fat32 1MiB 513MiB",
                "parted -s /dev/sdx set 1 esp on",
                "parted -s /dev/sdx -a optimal mkpart BOOT fat32 513MiB 4609MiB",
                "parted -s /dev/sdx set 2 boot on",
                "parted -s /dev/sdx -a optimal mkpart persistence btrfs 4609MiB 100%",
            ]
        );
        assert_eq!(lines[0], "wipefs -af /dev/sdx");
        assert!(lines
            .contains(&"dd if=/dev/zero of=/dev/sdx bs=1M count=10 conv=notrunc".to_string()));
    }

    #[test]
    fn failing_parted_is_fatal() {
        let hal = fake_disk();
        hal.respond("parted", ProcessResult::failure(1, "Error: Partition(s) busy"));
        let cfg = config();
        let layout = compute_layout(Path::new("/dev/sdx"), &cfg.layout);

        let err = PartitionPlanner::new(&hal, &cfg, &CancelFlag::new())
            .create_partitions(&layout)
            .unwrap_err();
        assert!(format!("{err:#}").contains("GPT"));
        assert!(hal.commands_for("mkfs.vfat").is_empty());
    }

    #[test]
    fn wait_returns_immediately_when_nodes_exist() {
        let hal = fake_disk();
        let cfg = config();
        let names = compute_layout(Path::new("/dev/sdx"), &cfg.layout).names();

        let cancel = CancelFlag::new();
        let planner = PartitionPlanner::new(&hal, &cfg, &cancel);
        assert!(planner.wait_for_partitions(Path::new("/dev/sdx"), &names));
        // partprobe + blockdev --rereadpt only; no rescans.
        assert_eq!(hal.commands_for("partprobe").len(), 1);
    }

    #[test]
    fn wait_gives_up_and_rescans_periodically() {
        let hal = FakeHal::new().with_block_device("/dev/sdy");
        let cfg = config();
        let names = compute_layout(Path::new("/dev/sdy"), &cfg.layout).names();

        let cancel = CancelFlag::new();
        let planner = PartitionPlanner::new(&hal, &cfg, &cancel);
        assert!(!planner.wait_for_partitions(Path::new("/dev/sdy"), &names));
        // 1 initial + polls 0, 3, 6, 9, 12 out of 15.
        assert_eq!(hal.commands_for("partprobe").len(), 6);
    }

    #[test]
    fn format_unmounts_then_formats_each_partition() {
        let hal = fake_disk();
        let cfg = config();
        let layout = compute_layout(Path::new("/dev/sdx"), &cfg.layout);

        PartitionPlanner::new(&hal, &cfg, &CancelFlag::new())
            .format_partitions(&layout)
            .unwrap();

        let lines = hal.command_lines();
        assert_eq!(
            lines,
            vec![
                "umount /dev/sdx1",
                "mkfs.vfat -F 32 -n EFI /dev/sdx1",
                "umount /dev/sdx2",
                "mkfs.vfat -F 32 -n BOOT /dev/sdx2",
                "umount /dev/sdx3",
                "mkfs.btrfs -f -L persistence -m single -d single /dev/sdx3",
            ]
        );
    }

    #[test]
    fn pending_cancel_stops_before_partition_table() {
        let hal = fake_disk();
        let cfg = config();
        let layout = compute_layout(Path::new("/dev/sdx"), &cfg.layout);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = PartitionPlanner::new(&hal, &cfg, &cancel)
            .create_partitions(&layout)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Cancelled)
        ));
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn cancel_during_partition_wait_stops_polling() {
        let hal = FakeHal::new().with_block_device("/dev/sdy");
        let cfg = config();
        let names = compute_layout(Path::new("/dev/sdy"), &cfg.layout).names();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let planner = PartitionPlanner::new(&hal, &cfg, &cancel);
        assert!(!planner.wait_for_partitions(Path::new("/dev/sdy"), &names));
        assert_eq!(hal.commands_for("partprobe").len(), 1);
    }
}
