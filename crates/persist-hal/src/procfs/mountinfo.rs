//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use crate::path::uses_p_infix;
use std::path::{Path, PathBuf};

pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    /// Mount source (e.g. `/dev/sdb2`), when the line carries one.
    pub source: Option<String>,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <pre fields...> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = match line.split_once(" - ") {
                Some((pre, post)) => (pre, Some(post)),
                None => (line, None),
            };
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let source = post
                .and_then(|p| p.split_whitespace().nth(1))
                .map(unescape_mount_path);
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                source,
            })
        })
        .collect()
}

/// Exact mount point match; `/mnt/usb` never matches a `/mnt/usb_boot` entry.
pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mount points whose source is `device` itself or one of its partitions.
pub fn mounted_from_device(entries: &[MountInfo], device: &Path) -> Vec<PathBuf> {
    let device = device.to_string_lossy();
    let mut mounts: Vec<PathBuf> = entries
        .iter()
        .filter(|e| {
            e.source
                .as_deref()
                .is_some_and(|src| is_device_or_partition(src, &device))
        })
        .map(|e| e.mount_point.clone())
        .collect();
    mounts.sort();
    mounts.dedup();
    mounts
}

/// True for `device` itself or one of its partitions, named the way the kernel names them:
/// `/dev/sda1` for SCSI-style disks, `/dev/nvme0n1p2` for nvme/mmcblk/loop.
/// `/dev/sdab1`, `/dev/sdap1` and `/dev/nvme0n12` are not partitions of the shorter name.
pub fn is_device_or_partition(source: &str, device: &str) -> bool {
    let Some(rest) = source.strip_prefix(device) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let digits = if uses_p_infix(Path::new(device)) {
        match rest.strip_prefix('p') {
            Some(digits) => digits,
            None => return false,
        }
    } else {
        rest
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
