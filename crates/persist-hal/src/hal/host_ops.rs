//! Host queries (read-only).
//!
//! This is "world-touching" (stats `/dev`, reads `/proc`, walks `PATH`) and belongs in the HAL.

use crate::HalResult;
use std::fs;
use std::path::{Path, PathBuf};

/// What a path resolves to after following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Missing,
    Regular,
    Directory,
    BlockDevice,
    CharDevice,
    Other,
}

impl FileKind {
    pub fn of(path: &Path) -> Self {
        use std::os::unix::fs::FileTypeExt;

        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => return FileKind::Missing,
        };
        let ft = meta.file_type();
        if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_file() {
            FileKind::Regular
        } else if ft.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Other
        }
    }
}

pub trait HostOps {
    /// Kind of the file at `path`, following symlinks. Unreadable paths report `Missing`.
    fn file_kind(&self, path: &Path) -> FileKind;

    fn file_size(&self, path: &Path) -> HalResult<u64>;

    /// Raw contents of the live mount table (`/proc/self/mountinfo` format).
    fn mount_table(&self) -> HalResult<String>;

    fn find_executable(&self, name: &str) -> Option<PathBuf>;

    fn is_root(&self) -> bool;

    fn path_exists(&self, path: &Path) -> bool {
        self.file_kind(path) != FileKind::Missing
    }
}

/// Search `path_env` (colon separated) for an executable named `name`.
pub fn find_executable_in_path(name: &str, path_env: &str) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    for dir in path_env.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(name);
        if let Ok(meta) = fs::metadata(&candidate) {
            if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}
