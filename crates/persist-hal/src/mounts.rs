//! Mount Manager: idempotent mount/unmount with retry and escalation.
//!
//! Unmount escalation per attempt: plain `umount` first, then `fuser -km` + `umount` on later
//! attempts, and a lazy `umount -l` once the final attempt still leaves the path mounted.

use crate::guards::MountGuard;
use crate::hal::{CommandSpec, OutputMode, ProcessResult, SystemHal};
use crate::procfs::mountinfo::{is_mounted_from_info, parse_mountinfo};
use crate::process::{capture_advisory, run, run_best_effort, RunOptions};
use crate::retry::{pause, RetryPolicy};
use crate::{HalError, HalResult};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MOUNTPOINT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(15);
pub const UMOUNT_TIMEOUT: Duration = Duration::from_secs(10);
pub const LAZY_UMOUNT_TIMEOUT: Duration = Duration::from_secs(5);
pub const FUSER_TIMEOUT: Duration = Duration::from_secs(5);
pub const LSBLK_TIMEOUT: Duration = Duration::from_secs(10);

/// Cleanup work that runs on error paths and never propagates a failure to its caller.
pub trait Cleanup {
    fn cleanup(&self);
}

/// Mount options and flags.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Additional mount options as a comma-separated string (e.g., "loop,ro")
    pub options: Option<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: impl Into<String>) -> Self {
        Self {
            options: Some(options.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MountSettings {
    /// Attempt count and the settle delay between escalation steps.
    pub retry: RetryPolicy,
    /// Wait after a lazy unmount for the namespace to drop the path.
    pub lazy_settle: Duration,
    /// Wait around the `unmount_all` sweep.
    pub sweep_settle: Duration,
    /// Every mount point this tool may have used, swept by `unmount_all`.
    pub known_mounts: Vec<PathBuf>,
}

impl MountSettings {
    pub fn new(known_mounts: Vec<PathBuf>) -> Self {
        Self {
            retry: RetryPolicy::new(3, Duration::from_millis(500)),
            lazy_settle: Duration::from_secs(1),
            sweep_settle: Duration::from_secs(1),
            known_mounts,
        }
    }

    /// Same escalation ladder without any sleeping.
    pub fn immediate(known_mounts: Vec<PathBuf>) -> Self {
        Self {
            retry: RetryPolicy::immediate(3),
            lazy_settle: Duration::ZERO,
            sweep_settle: Duration::ZERO,
            known_mounts,
        }
    }
}

pub struct MountManager<'a> {
    hal: &'a dyn SystemHal,
    settings: MountSettings,
}

impl<'a> MountManager<'a> {
    pub fn new(hal: &'a dyn SystemHal, settings: MountSettings) -> Self {
        Self { hal, settings }
    }

    pub fn settings(&self) -> &MountSettings {
        &self.settings
    }

    /// Whether `path` is currently a mount point.
    ///
    /// Asks `mountpoint -q` first; when the tool is absent or hangs, falls back to an exact
    /// match against the live mount table.
    pub fn is_mounted(&self, path: &Path) -> bool {
        let cmd = CommandSpec::new("mountpoint").arg("-q").path_arg(path);
        match self
            .hal
            .execute(&cmd, OutputMode::Capture, Some(MOUNTPOINT_TIMEOUT))
        {
            Ok(ProcessResult::Success(_)) => true,
            Ok(ProcessResult::Failure { .. }) => false,
            Ok(ProcessResult::Timeout { .. }) => self.is_mounted_from_table(path),
            Err(err) => {
                debug!("mountpoint unavailable ({}), reading mount table", err);
                self.is_mounted_from_table(path)
            }
        }
    }

    fn is_mounted_from_table(&self, path: &Path) -> bool {
        match self.hal.mount_table() {
            Ok(content) => is_mounted_from_info(path, &parse_mountinfo(&content)),
            Err(err) => {
                warn!("⚠️  Could not read mount table: {}", err);
                false
            }
        }
    }

    /// Unmount `path`, escalating over up to `max_attempts` attempts.
    ///
    /// Returns false (after a warning) when the path is still mounted at the end; whether that
    /// is fatal is the caller's decision.
    pub fn unmount(&self, path: &Path, max_attempts: u32) -> bool {
        if !self.hal.path_exists(path) {
            return true;
        }

        let policy = self.settings.retry.with_attempts(max_attempts);
        for attempt in policy.attempts() {
            if !self.is_mounted(path) {
                return true;
            }
            info!(
                "   Unmounting {} (attempt {}/{})",
                path.display(),
                attempt.number(),
                attempt.total
            );

            if !attempt.is_first() {
                self.kill_holders(path);
                policy.pause();
            }

            run_best_effort(
                self.hal,
                &CommandSpec::new("umount").path_arg(path),
                UMOUNT_TIMEOUT,
            );
            policy.pause();

            if !self.is_mounted(path) {
                info!("   ✓ Unmounted {}", path.display());
                return true;
            }

            if attempt.is_last() {
                info!("   Using lazy unmount for {}", path.display());
                run_best_effort(
                    self.hal,
                    &CommandSpec::new("umount").arg("-l").path_arg(path),
                    LAZY_UMOUNT_TIMEOUT,
                );
                pause(self.settings.lazy_settle);
            }
        }

        if !self.is_mounted(path) {
            return true;
        }
        warn!("⚠️  Warning: Could not fully unmount {}", path.display());
        false
    }

    /// [`unmount`](Self::unmount) with the configured attempt count.
    pub fn force_unmount(&self, path: &Path) -> bool {
        self.unmount(path, self.settings.retry.max_attempts)
    }

    fn kill_holders(&self, path: &Path) {
        run_best_effort(
            self.hal,
            &CommandSpec::new("fuser").arg("-km").path_arg(path),
            FUSER_TIMEOUT,
        );
    }

    /// Best-effort sweep over every known mount point and every partition of `device`.
    ///
    /// Never fails: it runs during error recovery, where a second error would mask the first.
    pub fn unmount_all(&self, device: &Path) {
        info!("🔍 Unmounting all partitions on {}...", device.display());

        let existing: Vec<&PathBuf> = self
            .settings
            .known_mounts
            .iter()
            .filter(|mp| self.hal.path_exists(mp))
            .collect();

        for mount_point in &existing {
            self.kill_holders(mount_point);
        }
        pause(self.settings.sweep_settle);

        for mount_point in &existing {
            self.force_unmount(mount_point);
        }

        let listing = CommandSpec::new("lsblk")
            .arg("-lnp")
            .args(["-o", "NAME"])
            .path_arg(device);
        if let Some(stdout) = capture_advisory(self.hal, &listing, LSBLK_TIMEOUT) {
            for partition in partitions_from_listing(&stdout, device) {
                run_best_effort(
                    self.hal,
                    &CommandSpec::new("umount").arg("-l").path_arg(&partition),
                    LAZY_UMOUNT_TIMEOUT,
                );
            }
        }

        // Final sweep of the whole-disk node itself.
        run_best_effort(
            self.hal,
            &CommandSpec::new("umount").arg("-l").path_arg(device),
            LAZY_UMOUNT_TIMEOUT,
        );

        info!("✓ Unmount complete");
        pause(self.settings.sweep_settle);
    }

    /// Ensure the directory for a mount point exists with mode 0755.
    pub fn prepare_mount_point(&self, path: &Path) -> HalResult<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::create_dir_all(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    /// Clear `target`, mount `source` on it and return a guard that unmounts on drop.
    pub fn mount(
        &self,
        source: &Path,
        target: &Path,
        options: &MountOptions,
    ) -> HalResult<MountGuard<'_>> {
        self.prepare_mount_point(target)
            .map_err(|e| mount_failed(source, target, e.to_string()))?;

        // Never assume a mount point is clean.
        if !self.force_unmount(target) {
            warn!(
                "⚠️  {} still mounted, mounting over it anyway",
                target.display()
            );
        }

        let mut cmd = CommandSpec::new("mount");
        if let Some(opts) = options.options.as_deref() {
            cmd = cmd.arg("-o").arg(opts);
        }
        let cmd = cmd.path_arg(source).path_arg(target);

        info!("⚙️  Mounting {} -> {}", source.display(), target.display());
        run(self.hal, &cmd, &RunOptions::required(MOUNT_TIMEOUT))
            .map_err(|e| mount_failed(source, target, e.to_string()))?;

        Ok(MountGuard::new(self, target))
    }
}

fn mount_failed(source: &Path, target: &Path, reason: String) -> HalError {
    HalError::MountFailed {
        device: source.display().to_string(),
        target: target.display().to_string(),
        reason,
    }
}

/// Partition nodes from `lsblk -lnp -o NAME <device>` output, excluding the disk itself.
pub fn partitions_from_listing(stdout: &str, device: &Path) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .filter(|p| p != device)
        .collect()
}

/// Releases a device's mounts on drop of the pipeline's error path.
pub struct DeviceRelease<'m, 'a> {
    mounts: &'m MountManager<'a>,
    device: PathBuf,
}

impl<'m, 'a> DeviceRelease<'m, 'a> {
    pub fn new(mounts: &'m MountManager<'a>, device: impl Into<PathBuf>) -> Self {
        Self {
            mounts,
            device: device.into(),
        }
    }
}

impl Cleanup for DeviceRelease<'_, '_> {
    fn cleanup(&self) {
        self.mounts.unmount_all(&self.device);
    }
}
