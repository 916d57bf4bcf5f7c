//! Host-level checks that need no root: real child processes and read-only mount queries.

use persist_hal::{
    capture_advisory, run_required, CommandSpec, HalError, HostOps, LinuxHal, MountManager,
    MountSettings,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").args(["-c", script])
}

#[test]
fn required_command_failure_carries_exit_code_and_stderr() {
    let hal = LinuxHal::new();
    let err = run_required(&hal, &sh("echo broken >&2; exit 3"), Duration::from_secs(5))
        .unwrap_err();
    match err {
        HalError::CommandFailed { program, code, stderr } => {
            assert_eq!(program, "sh");
            assert_eq!(code, Some(3));
            assert!(stderr.contains("broken"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn hung_command_is_cut_off_at_its_budget() {
    let hal = LinuxHal::new();
    let started = Instant::now();
    let err = run_required(&hal, &CommandSpec::new("sleep").arg("10"), Duration::from_millis(300))
        .unwrap_err();
    assert!(matches!(err, HalError::CommandTimeout { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn advisory_capture_returns_stdout() {
    let hal = LinuxHal::new();
    let out = capture_advisory(&hal, &sh("printf 'sdx\\nsdx1\\n'"), Duration::from_secs(5));
    assert_eq!(out.as_deref(), Some("sdx\nsdx1\n"));
}

#[test]
fn unmounting_a_plain_directory_is_a_no_op() {
    let hal = LinuxHal::new();
    let dir = tempdir().unwrap();
    let mounts = MountManager::new(&hal, MountSettings::immediate(Vec::new()));

    assert!(!mounts.is_mounted(dir.path()));
    assert!(mounts.force_unmount(dir.path()));
    assert!(dir.path().is_dir());
}

#[test]
fn root_filesystem_is_reported_mounted() {
    let hal = LinuxHal::new();
    let mounts = MountManager::new(&hal, MountSettings::immediate(Vec::new()));
    assert!(mounts.is_mounted(Path::new("/")));
    assert!(hal.mount_table().unwrap().contains(" / "));
}
