//! Linux HAL implementation using real processes and filesystem queries.

use super::{CommandSpec, FileKind, HostOps, OutputMode, ProcessOps, ProcessResult};
use crate::procfs::mountinfo::MOUNTINFO_PATH;
use crate::{CommandOutput, HalError, HalResult};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

fn map_spawn_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

/// Wait for `child`, killing it once `timeout` expires. `Ok(None)` means it was killed.
fn wait_bounded(child: &mut Child, timeout: Option<Duration>) -> HalResult<Option<ExitStatus>> {
    match timeout {
        None => Ok(Some(child.wait()?)),
        Some(limit) => match child.wait_timeout(limit)? {
            Some(status) => Ok(Some(status)),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Ok(None)
            }
        },
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn capture(cmd: &CommandSpec, timeout: Option<Duration>) -> HalResult<ProcessResult> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| map_spawn_err(&cmd.program, e))?;

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = drain(child.stdout.take());
    let stderr_handle = drain(child.stderr.take());

    let status = wait_bounded(&mut child, timeout)?;
    let stdout = String::from_utf8_lossy(&stdout_handle.join().unwrap_or_default()).to_string();
    let stderr = String::from_utf8_lossy(&stderr_handle.join().unwrap_or_default()).to_string();

    Ok(match status {
        None => ProcessResult::Timeout {
            after: timeout.unwrap_or_default(),
        },
        Some(status) if status.success() => {
            ProcessResult::Success(CommandOutput { stdout, stderr })
        }
        Some(status) => ProcessResult::Failure {
            code: status.code(),
            stdout,
            stderr,
        },
    })
}

fn stream(cmd: &CommandSpec, timeout: Option<Duration>) -> HalResult<ProcessResult> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| map_spawn_err(&cmd.program, e))?;

    Ok(match wait_bounded(&mut child, timeout)? {
        None => ProcessResult::Timeout {
            after: timeout.unwrap_or_default(),
        },
        Some(status) if status.success() => ProcessResult::success(),
        Some(status) => ProcessResult::Failure {
            code: status.code(),
            stdout: String::new(),
            stderr: String::new(),
        },
    })
}

impl ProcessOps for LinuxHal {
    fn execute(
        &self,
        cmd: &CommandSpec,
        mode: OutputMode,
        timeout: Option<Duration>,
    ) -> HalResult<ProcessResult> {
        match mode {
            OutputMode::Capture => capture(cmd, timeout),
            OutputMode::Stream => stream(cmd, timeout),
        }
    }
}

impl HostOps for LinuxHal {
    fn file_kind(&self, path: &Path) -> FileKind {
        FileKind::of(path)
    }

    fn file_size(&self, path: &Path) -> HalResult<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn mount_table(&self) -> HalResult<String> {
        Ok(fs::read_to_string(MOUNTINFO_PATH)?)
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        let path_env = std::env::var("PATH").unwrap_or_default();
        super::host_ops::find_executable_in_path(name, &path_env)
    }

    fn is_root(&self) -> bool {
        nix::unistd::Uid::effective().is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_stdout() {
        let hal = LinuxHal::new();
        let cmd = CommandSpec::new("sh").args(["-c", "echo hello"]);
        let result = hal
            .execute(&cmd, OutputMode::Capture, Some(Duration::from_secs(5)))
            .unwrap();
        match result {
            ProcessResult::Success(out) => assert_eq!(out.stdout_trimmed(), "hello"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn nonzero_exit_is_failure_with_stderr() {
        let hal = LinuxHal::new();
        let cmd = CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        let result = hal
            .execute(&cmd, OutputMode::Capture, Some(Duration::from_secs(5)))
            .unwrap();
        match result {
            ProcessResult::Failure { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn expired_budget_reports_timeout() {
        let hal = LinuxHal::new();
        let cmd = CommandSpec::new("sleep").arg("5");
        let result = hal
            .execute(&cmd, OutputMode::Capture, Some(Duration::from_millis(100)))
            .unwrap();
        assert!(matches!(result, ProcessResult::Timeout { .. }));
    }

    #[test]
    fn missing_program_is_command_not_found() {
        let hal = LinuxHal::new();
        let cmd = CommandSpec::new("persist-usb-no-such-tool");
        let err = hal.execute(&cmd, OutputMode::Capture, None).unwrap_err();
        assert!(err.is_command_not_found());
    }

    #[test]
    fn stream_mode_waits_without_budget() {
        let hal = LinuxHal::new();
        let cmd = CommandSpec::new("true");
        let result = hal.execute(&cmd, OutputMode::Stream, None).unwrap();
        assert!(result.is_success());
    }
}
