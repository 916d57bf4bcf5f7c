//! Process execution primitives.
//!
//! External commands are "world-touching" and must go through the HAL so the provisioning
//! pipeline can be exercised without spawning real processes.

use crate::HalResult;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// A structured command invocation: program plus argument vector, never a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Last argument, which for mount-style tools is the target path.
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Whether a command's output is captured for the caller or streamed to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Capture,
    Stream,
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Outcome of one external command.
///
/// There is no partial success. `Timeout` is kept apart from `Failure` because the external
/// operation may still be running (a detached unmount, a slow flush).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Success(CommandOutput),
    Failure {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Timeout {
        after: Duration,
    },
}

impl ProcessResult {
    pub fn success() -> Self {
        ProcessResult::Success(CommandOutput::default())
    }

    pub fn success_with_stdout(stdout: impl Into<String>) -> Self {
        ProcessResult::Success(CommandOutput {
            stdout: stdout.into(),
            stderr: String::new(),
        })
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        ProcessResult::Failure {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessResult::Success(_))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessResult::Success(_) => Some(0),
            ProcessResult::Failure { code, .. } => *code,
            ProcessResult::Timeout { .. } => None,
        }
    }
}

/// Process execution trait (external command runner).
pub trait ProcessOps {
    /// Spawn `cmd` and wait for it.
    ///
    /// `timeout: None` waits indefinitely. Errors are reserved for commands that could not be
    /// started at all; a non-zero exit or an expired budget is a [`ProcessResult`].
    fn execute(
        &self,
        cmd: &CommandSpec,
        mode: OutputMode,
        timeout: Option<Duration>,
    ) -> HalResult<ProcessResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = CommandSpec::new("mount")
            .args(["-o", "loop,ro"])
            .arg("/tmp/my image.iso")
            .arg("/mnt/iso_temp");
        assert_eq!(
            cmd.to_string(),
            "mount -o loop,ro '/tmp/my image.iso' /mnt/iso_temp"
        );
    }

    #[test]
    fn last_arg_is_mount_target() {
        let cmd = CommandSpec::new("umount").arg("-l").arg("/mnt/usb_boot");
        assert_eq!(cmd.last_arg(), Some("/mnt/usb_boot"));
        assert!(cmd.has_arg("-l"));
    }

    #[test]
    fn exit_code_reflects_outcome() {
        assert_eq!(ProcessResult::success().exit_code(), Some(0));
        assert_eq!(ProcessResult::failure(32, "busy").exit_code(), Some(32));
        let timeout = ProcessResult::Timeout {
            after: Duration::from_secs(5),
        };
        assert_eq!(timeout.exit_code(), None);
        assert!(!timeout.is_success());
    }
}
