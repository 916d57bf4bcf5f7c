use crate::mounts::MountManager;
use std::path::{Path, PathBuf};

/// RAII guard that unmounts a target path when dropped.
pub struct MountGuard<'a> {
    mounts: &'a MountManager<'a>,
    target: PathBuf,
    active: bool,
}

impl<'a> MountGuard<'a> {
    pub fn new(mounts: &'a MountManager<'a>, target: impl Into<PathBuf>) -> Self {
        Self {
            mounts,
            target: target.into(),
            active: true,
        }
    }

    /// Prevent automatic unmounting and return the target path.
    pub fn release(mut self) -> PathBuf {
        self.active = false;
        self.target.clone()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Unmount now and report whether the target is clear.
    pub fn unmount(mut self) -> bool {
        self.active = false;
        self.mounts.force_unmount(&self.target)
    }
}

impl std::fmt::Debug for MountGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountGuard")
            .field("target", &self.target)
            .field("active", &self.active)
            .finish()
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if !self.mounts.force_unmount(&self.target) {
            log::warn!("mount guard failed to unmount {}", self.target.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::FakeHal;
    use crate::mounts::MountSettings;
    use tempfile::tempdir;

    #[test]
    fn mount_guard_unmounts_on_drop() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().to_path_buf();
        let hal = FakeHal::new();
        hal.set_mounted(&target);
        let mounts = MountManager::new(&hal, MountSettings::immediate(vec![]));

        {
            let _guard = MountGuard::new(&mounts, &target);
        }

        assert!(!hal.is_path_mounted(&target));
    }

    #[test]
    fn mount_guard_release_skips_unmount() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().to_path_buf();
        let hal = FakeHal::new();
        hal.set_mounted(&target);
        let mounts = MountManager::new(&hal, MountSettings::immediate(vec![]));

        {
            let guard = MountGuard::new(&mounts, &target);
            assert_eq!(guard.release(), target);
        }

        assert!(hal.is_path_mounted(&target));
    }

    #[test]
    fn explicit_unmount_reports_result() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().to_path_buf();
        let hal = FakeHal::new();
        hal.set_mounted(&target);
        let mounts = MountManager::new(&hal, MountSettings::immediate(vec![]));

        assert!(MountGuard::new(&mounts, &target).unmount());
        let umounts = hal.commands_for("umount");
        assert_eq!(umounts.len(), 1);
    }
}
