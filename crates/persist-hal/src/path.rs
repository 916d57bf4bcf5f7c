//! Partition path helper for block devices.

use std::path::{Path, PathBuf};

/// Device name prefixes whose kernel naming inserts a `p` before the partition number.
const P_INFIX_PREFIXES: [&str; 3] = ["mmcblk", "nvme", "loop"];

/// True when partitions of `disk` are named `<disk>pN` rather than `<disk>N`.
pub fn uses_p_infix(disk: &Path) -> bool {
    disk.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| P_INFIX_PREFIXES.iter().any(|p| name.starts_with(p)))
}

/// Path of partition `num` on `disk` (handles nvme/mmcblk/loop postfixing).
pub fn partition_path(disk: &Path, num: u32) -> PathBuf {
    let disk_str = disk.display().to_string();
    if uses_p_infix(disk) {
        PathBuf::from(format!("{}p{}", disk_str, num))
    } else {
        PathBuf::from(format!("{}{}", disk_str, num))
    }
}
