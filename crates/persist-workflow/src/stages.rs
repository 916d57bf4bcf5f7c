//! Stage bodies of the provisioning pipeline.
//!
//! Every stage that mounts something holds a `MountGuard`, so the mount is released on every
//! exit path before the next stage reuses the mount point. Stages check the cancel flag before
//! each mount and each long or destructive command; an interrupt fails the stage at the next
//! such point.

use crate::cancel::CancelFlag;
use crate::config::ProvisionConfig;
use crate::layout::PartitionLayout;
use crate::partition::PartitionPlanner;
use crate::pipeline::ProvisionState;
use crate::report::{README_FILE, README_TEXT};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use persist_hal::retry::pause;
use persist_hal::{
    run_advisory, run_outcome, run_required, CommandSpec, MountManager, MountOptions, OutputMode,
    ProcessResult, Requirement, RunOptions, SystemHal,
};
use std::fs;
use std::path::Path;

pub const PERSISTENCE_CONF: &str = "persistence.conf";
pub const PERSISTENCE_CONF_BODY: &str = "/ union\n";
pub const GRUB_CFG: &str = "boot/grub/grub.cfg";
pub const LIVE_BOOT_MARKER: &str = "boot=live";
pub const PERSISTENCE_PARAMS: &str = "persistence persistence-storage=btrfs,ext4";

/// rsync exit codes for partial transfers (attributes FAT cannot hold, vanished files).
const RSYNC_PARTIAL: [i32; 2] = [23, 24];

pub struct StageContext<'a> {
    pub hal: &'a dyn SystemHal,
    pub mounts: &'a MountManager<'a>,
    pub config: &'a ProvisionConfig,
    pub layout: &'a PartitionLayout,
    pub image: &'a Path,
    pub cancel: &'a CancelFlag,
}

impl StageContext<'_> {
    fn device(&self) -> &Path {
        &self.layout.device
    }

    /// Release `target` and give the kernel a moment before it is mounted again.
    fn clear(&self, target: &Path) {
        self.mounts.force_unmount(target);
        pause(self.config.timings.mount_settle);
    }

    fn checkpoint(&self) -> Result<()> {
        Ok(self.cancel.check()?)
    }

    fn sync(&self) -> Result<()> {
        self.checkpoint()?;
        run_required(self.hal, &CommandSpec::new("sync"), self.config.timeouts.sync)
            .context("Failed to flush filesystem buffers")
    }
}

pub fn unmount_all(ctx: &StageContext<'_>) -> Result<()> {
    ctx.mounts.unmount_all(ctx.device());
    Ok(())
}

pub fn create_partitions(ctx: &StageContext<'_>) -> Result<()> {
    let planner = PartitionPlanner::new(ctx.hal, ctx.config, ctx.cancel);
    planner.create_partitions(ctx.layout)?;
    planner.format_partitions(ctx.layout)
}

pub fn setup_subvolumes(ctx: &StageContext<'_>, state: &mut ProvisionState) -> Result<()> {
    info!("🌳 Setting up Btrfs subvolumes...");
    let target = &ctx.config.mounts.persist;
    ctx.clear(target);

    info!(
        "⚙️  Mounting Btrfs partition: {}",
        ctx.layout.persistence.node.display()
    );
    let options = MountOptions::with_options(ctx.config.persist_mount_options.clone());
    ctx.checkpoint()?;
    let guard = match ctx
        .mounts
        .mount(&ctx.layout.persistence.node, target, &options)
    {
        Ok(guard) => guard,
        Err(err) => {
            warn!("⚠️  Failed to mount Btrfs partition, skipping subvolumes: {}", err);
            state.warn("subvolumes skipped: persistence partition did not mount");
            return Ok(());
        }
    };

    info!("📁 Creating Btrfs subvolumes...");
    for name in &ctx.config.subvolumes {
        ctx.checkpoint()?;
        let cmd = CommandSpec::new("btrfs")
            .args(["subvolume", "create"])
            .path_arg(&target.join(name));
        // An existing subvolume is not an error worth stopping for.
        run_advisory(ctx.hal, &cmd, ctx.config.timeouts.subvolume);
    }

    for dir in &ctx.config.subvolume_dirs {
        let path = target.join(dir);
        if let Err(err) = fs::create_dir_all(&path) {
            warn!("⚠️  Could not create {}: {}", path.display(), err);
        }
    }

    info!("✅ Btrfs subvolumes created!");
    guard.unmount();
    Ok(())
}

pub fn copy_image(ctx: &StageContext<'_>) -> Result<()> {
    info!("📀 Copying image contents to USB...");
    let paths = &ctx.config.mounts;

    ctx.checkpoint()?;
    info!("⚙️  Mounting image: {}", ctx.image.display());
    let image_guard = ctx
        .mounts
        .mount(ctx.image, &paths.image, &MountOptions::with_options("loop,ro"))
        .context("Failed to mount image")?;

    info!(
        "⚙️  Mounting USB boot partition: {}",
        ctx.layout.boot.node.display()
    );
    ctx.clear(&paths.boot);
    ctx.checkpoint()?;
    let boot_guard = ctx
        .mounts
        .mount(&ctx.layout.boot.node, &paths.boot, &MountOptions::new())
        .context("Failed to mount USB boot partition")?;

    info!("📋 Copying image files (this may take 5-15 minutes)...");
    let copied = ctx
        .checkpoint()
        .and_then(|()| rsync(ctx, &paths.image, &paths.boot));

    info!("⏳ Syncing filesystem (this may take 30 seconds)...");
    let synced = ctx.sync();
    pause(ctx.config.timings.partition_settle);

    boot_guard.unmount();
    image_guard.unmount();

    copied?;
    synced?;
    info!("✅ Image contents copied!");
    Ok(())
}

fn rsync(ctx: &StageContext<'_>, from: &Path, to: &Path) -> Result<()> {
    let cmd = CommandSpec::new("rsync")
        .args([
            "-avh",
            "--no-perms",
            "--no-owner",
            "--no-group",
            "--modify-window=1",
            "--exclude=lost+found",
            "--info=progress2",
        ])
        .arg(format!("{}/", from.display()))
        .arg(format!("{}/", to.display()));

    // Bulk copy: progress is streamed and duration is data dependent.
    let opts = RunOptions {
        requirement: Requirement::Required,
        output: OutputMode::Stream,
        timeout: None,
    };
    match run_outcome(ctx.hal, &cmd, &opts).context("Failed to run rsync")? {
        ProcessResult::Success(_) => Ok(()),
        ProcessResult::Failure {
            code: Some(code), ..
        } if RSYNC_PARTIAL.contains(&code) => {
            warn!(
                "⚠️  rsync finished with partial transfer (exit {}), continuing",
                code
            );
            Ok(())
        }
        other => match other.exit_code() {
            Some(code) => bail!("Copy failed: rsync exited with {}", code),
            None => bail!("Copy failed: rsync was terminated"),
        },
    }
}

/// Add persistence boot parameters after every live-boot marker.
///
/// Returns `None` when nothing should change: the config already mentions persistence, or it
/// has no live-boot entry to extend.
pub fn inject_persistence_params(grub_cfg: &str) -> Option<String> {
    if grub_cfg.contains("persistence") || !grub_cfg.contains(LIVE_BOOT_MARKER) {
        return None;
    }
    Some(grub_cfg.replace(
        LIVE_BOOT_MARKER,
        &format!("{} {}", LIVE_BOOT_MARKER, PERSISTENCE_PARAMS),
    ))
}

pub fn configure_persistence(ctx: &StageContext<'_>, state: &mut ProvisionState) -> Result<()> {
    info!("⚙️  Configuring persistence system...");
    let boot = &ctx.config.mounts.boot;
    ctx.clear(boot);
    ctx.checkpoint()?;

    let guard = ctx
        .mounts
        .mount(&ctx.layout.boot.node, boot, &MountOptions::new())
        .context("Failed to mount boot partition")?;

    info!("📝 Creating {}...", PERSISTENCE_CONF);
    let conf = boot.join(PERSISTENCE_CONF);
    match fs::write(&conf, PERSISTENCE_CONF_BODY) {
        Ok(()) => info!("✅ Created: {}", conf.display()),
        Err(err) => {
            warn!("⚠️  Warning: Could not create {}: {}", conf.display(), err);
            state.warn("persistence.conf could not be written");
        }
    }

    let grub_cfg = boot.join(GRUB_CFG);
    if grub_cfg.exists() {
        info!("📝 Updating GRUB configuration...");
        if let Err(err) = patch_grub_cfg(&grub_cfg) {
            warn!("⚠️  Could not modify GRUB config: {:#}", err);
            state.warn("GRUB menu was not patched for persistence");
        }
    }

    let synced = ctx.sync();
    pause(ctx.config.timings.mount_settle);
    guard.unmount();
    synced?;

    info!("✅ Persistence configured!");
    Ok(())
}

fn patch_grub_cfg(path: &Path) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    match inject_persistence_params(&content) {
        Some(patched) => {
            fs::write(path, patched)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("✅ GRUB config updated");
        }
        None => info!("   GRUB config left unchanged"),
    }
    Ok(())
}

pub fn install_bootloader(ctx: &StageContext<'_>, state: &mut ProvisionState) -> Result<()> {
    info!("🚀 Installing bootloader...");
    let paths = &ctx.config.mounts;
    let grub_timeout = ctx.config.timeouts.grub;
    let boot_dir = paths.boot.join("boot");
    ctx.clear(&paths.boot);
    ctx.checkpoint()?;

    let boot_guard = match ctx
        .mounts
        .mount(&ctx.layout.boot.node, &paths.boot, &MountOptions::new())
    {
        Ok(guard) => guard,
        Err(err) => {
            warn!("⚠️  Could not mount boot partition: {}", err);
            state.warn("bootloader not installed: boot partition did not mount");
            return Ok(());
        }
    };

    ctx.checkpoint()?;
    info!("📀 Installing GRUB for BIOS/Legacy boot...");
    let bios = CommandSpec::new("grub-install")
        .arg("--target=i386-pc")
        .arg(format!("--boot-directory={}", boot_dir.display()))
        .path_arg(ctx.device());
    if run_advisory(ctx.hal, &bios, grub_timeout) {
        info!("✅ GRUB installed for BIOS boot");
    } else {
        warn!("⚠️  GRUB BIOS installation had issues (may still work)");
        state.warn("GRUB BIOS installation had issues");
    }

    ctx.clear(&paths.esp);
    ctx.checkpoint()?;
    match ctx
        .mounts
        .mount(&ctx.layout.esp.node, &paths.esp, &MountOptions::new())
    {
        Ok(esp_guard) => {
            ctx.checkpoint()?;
            info!("📀 Installing GRUB for UEFI boot...");
            let efi = CommandSpec::new("grub-install")
                .arg("--target=x86_64-efi")
                .arg(format!("--efi-directory={}", paths.esp.display()))
                .arg(format!("--boot-directory={}", boot_dir.display()))
                .args(["--removable", "--recheck"])
                .path_arg(ctx.device());
            if run_advisory(ctx.hal, &efi, grub_timeout) {
                info!("✅ GRUB installed for UEFI boot");
            } else {
                warn!("⚠️  GRUB UEFI installation had issues");
                state.warn("GRUB UEFI installation had issues");
            }
            esp_guard.unmount();
        }
        Err(err) => {
            warn!("⚠️  Could not install UEFI bootloader: {}", err);
            state.warn("UEFI bootloader not installed: ESP did not mount");
        }
    }

    boot_guard.unmount();
    info!("✅ Bootloader installation complete!");
    Ok(())
}

pub fn create_readme(ctx: &StageContext<'_>, state: &mut ProvisionState) -> Result<()> {
    let boot = &ctx.config.mounts.boot;
    ctx.clear(boot);
    ctx.checkpoint()?;

    let guard = match ctx
        .mounts
        .mount(&ctx.layout.boot.node, boot, &MountOptions::new())
    {
        Ok(guard) => guard,
        Err(err) => {
            warn!("⚠️  Could not mount boot partition for README: {}", err);
            state.warn("README not written");
            return Ok(());
        }
    };

    let readme = boot.join(README_FILE);
    match fs::write(&readme, README_TEXT) {
        Ok(()) => info!("✅ Created {}", README_FILE),
        Err(err) => {
            warn!("⚠️  Could not create README: {}", err);
            state.warn("README not written");
        }
    }
    guard.unmount();
    Ok(())
}

pub fn final_cleanup(ctx: &StageContext<'_>) -> Result<()> {
    info!("🧹 Final cleanup...");
    ctx.mounts.unmount_all(ctx.device());
    ctx.sync()
}
