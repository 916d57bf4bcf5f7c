//! Device Validator: target device and source image checks.

use crate::errors::ValidationError;
use log::{info, warn};
use persist_hal::procfs::mountinfo::{mounted_from_device, parse_mountinfo};
use persist_hal::{capture_advisory, CommandSpec, FileKind, SystemHal};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Confirm `device` is a block device that does not host the running system.
///
/// The safety check consults both `lsblk` and the live mount table; either one finding a
/// partition of `device` mounted at a protected path fails validation.
pub fn validate_device(
    hal: &dyn SystemHal,
    device: &Path,
    protected: &[PathBuf],
    timeout: Duration,
) -> Result<(), ValidationError> {
    match hal.file_kind(device) {
        FileKind::Missing => return Err(ValidationError::DeviceMissing(device.to_path_buf())),
        FileKind::BlockDevice => {}
        _ => return Err(ValidationError::NotBlockDevice(device.to_path_buf())),
    }

    let listing = CommandSpec::new("lsblk")
        .arg("-ln")
        .args(["-o", "NAME,MOUNTPOINT"])
        .path_arg(device);
    match capture_advisory(hal, &listing, timeout) {
        Some(stdout) => {
            if let Some(mount_point) = protected_in_listing(&stdout, protected) {
                return Err(system_disk(device, mount_point));
            }
        }
        None => warn!("⚠️  Could not verify device safety with lsblk"),
    }

    match hal.mount_table() {
        Ok(table) => {
            let mounts = mounted_from_device(&parse_mountinfo(&table), device);
            if let Some(mount_point) = mounts.into_iter().find(|m| protected.contains(m)) {
                return Err(system_disk(device, mount_point));
            }
        }
        Err(err) => warn!("⚠️  Could not read mount table: {}", err),
    }

    Ok(())
}

fn system_disk(device: &Path, mount_point: PathBuf) -> ValidationError {
    ValidationError::SystemDisk {
        device: device.to_path_buf(),
        mount_point,
    }
}

/// First protected mount point named in `lsblk -ln -o NAME,MOUNTPOINT` output.
pub fn protected_in_listing(stdout: &str, protected: &[PathBuf]) -> Option<PathBuf> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(PathBuf::from)
        .find(|mp| protected.contains(mp))
}

/// Confirm `image` is a regular file and return its size. Small images only warn.
pub fn validate_image(
    hal: &dyn SystemHal,
    image: &Path,
    warn_below: u64,
) -> Result<u64, ValidationError> {
    match hal.file_kind(image) {
        FileKind::Missing => return Err(ValidationError::ImageMissing(image.to_path_buf())),
        FileKind::Regular => {}
        _ => return Err(ValidationError::ImageNotFile(image.to_path_buf())),
    }

    let size = hal
        .file_size(image)
        .map_err(|e| ValidationError::ImageUnreadable {
            path: image.to_path_buf(),
            reason: e.to_string(),
        })?;
    let size_mb = size as f64 / (1024.0 * 1024.0);
    if size < warn_below {
        warn!("⚠️  Warning: image file seems small ({:.1} MB)", size_mb);
    }
    info!("📀 Image size: {:.1} MB", size_mb);
    Ok(size)
}
