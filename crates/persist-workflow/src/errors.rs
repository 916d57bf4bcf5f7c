use std::path::PathBuf;
use thiserror::Error;

/// Precondition failures. Reported before the device is touched.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Device not found: {}", .0.display())]
    DeviceMissing(PathBuf),

    #[error("Not a block device: {}", .0.display())]
    NotBlockDevice(PathBuf),

    #[error("Safety check: {} mounted at {} (this is your system disk!)", .device.display(), .mount_point.display())]
    SystemDisk {
        device: PathBuf,
        mount_point: PathBuf,
    },

    #[error("Image file not found: {}", .0.display())]
    ImageMissing(PathBuf),

    #[error("Not a regular file: {}", .0.display())]
    ImageNotFile(PathBuf),

    #[error("Cannot read image {}: {reason}", .path.display())]
    ImageUnreadable { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("This tool must be run as root (use sudo)")]
    NotRoot,

    #[error("Required tools still missing after install attempt: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("Cancelled by user")]
    Cancelled,
}
