//! Process Runner: required/advisory policy over [`ProcessOps`].
//!
//! Every command is echoed for audit before it runs. A required command that fails or exceeds
//! its budget becomes an error; an advisory one is logged and yields `None`.

use crate::hal::{CommandOutput, CommandSpec, OutputMode, ProcessOps, ProcessResult};
use crate::{HalError, HalResult};
use log::{debug, info, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Failure halts the caller.
    Required,
    /// Failure is logged and the flow continues.
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub requirement: Requirement,
    pub output: OutputMode,
    /// `None` means no budget at all (bulk copy).
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn required(timeout: Duration) -> Self {
        Self {
            requirement: Requirement::Required,
            output: OutputMode::Capture,
            timeout: Some(timeout),
        }
    }

    pub fn advisory(timeout: Duration) -> Self {
        Self {
            requirement: Requirement::Advisory,
            output: OutputMode::Capture,
            timeout: Some(timeout),
        }
    }

    pub fn streamed(mut self) -> Self {
        self.output = OutputMode::Stream;
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn is_advisory(&self) -> bool {
        self.requirement == Requirement::Advisory
    }
}

/// Echo and execute `cmd`, returning the raw outcome without applying the policy.
pub fn run_outcome<H: ProcessOps + ?Sized>(
    hal: &H,
    cmd: &CommandSpec,
    opts: &RunOptions,
) -> HalResult<ProcessResult> {
    info!(">> {}", cmd);
    let result = hal.execute(cmd, opts.output, opts.timeout)?;
    match &result {
        ProcessResult::Success(out) => {
            if !out.stdout.trim().is_empty() {
                info!("{}", out.stdout.trim_end());
            }
            if !out.stderr.trim().is_empty() {
                debug!("{}", out.stderr.trim_end());
            }
        }
        ProcessResult::Failure { stdout, stderr, .. } => {
            if !stdout.trim().is_empty() {
                info!("{}", stdout.trim_end());
            }
            if !stderr.trim().is_empty() {
                debug!("{}", stderr.trim_end());
            }
        }
        ProcessResult::Timeout { .. } => {}
    }
    Ok(result)
}

/// Run `cmd` under `opts`.
///
/// * success: `Ok(Some(output))` (stream mode yields empty output)
/// * advisory failure, timeout or missing tool: logged, `Ok(None)`
/// * required failure: `Err(CommandFailed)`, timeout: `Err(CommandTimeout)`
pub fn run<H: ProcessOps + ?Sized>(
    hal: &H,
    cmd: &CommandSpec,
    opts: &RunOptions,
) -> HalResult<Option<CommandOutput>> {
    let result = match run_outcome(hal, cmd, opts) {
        Ok(result) => result,
        Err(err) if opts.is_advisory() => {
            warn!("⚠️  Ignored error: {} ({})", cmd, err);
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    match result {
        ProcessResult::Success(out) => Ok(Some(out)),
        ProcessResult::Failure {
            code,
            stdout,
            stderr,
        } => {
            let details = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            if opts.is_advisory() {
                warn!("⚠️  Ignored error: {}", cmd);
                if !details.is_empty() {
                    warn!("   Details: {}", details);
                }
                return Ok(None);
            }
            warn!("❌ Command failed: {}", cmd);
            Err(HalError::CommandFailed {
                program: cmd.program.clone(),
                code,
                stderr: details,
            })
        }
        ProcessResult::Timeout { after } => {
            warn!("⚠️  Command timed out: {}", cmd);
            if opts.is_advisory() {
                return Ok(None);
            }
            Err(HalError::CommandTimeout {
                program: cmd.program.clone(),
                timeout_secs: after.as_secs(),
            })
        }
    }
}

/// Run `cmd` as a required command, discarding its output.
pub fn run_required<H: ProcessOps + ?Sized>(
    hal: &H,
    cmd: &CommandSpec,
    timeout: Duration,
) -> HalResult<()> {
    run(hal, cmd, &RunOptions::required(timeout)).map(|_| ())
}

/// Run `cmd` as an advisory command. Returns whether it succeeded.
pub fn run_advisory<H: ProcessOps + ?Sized>(hal: &H, cmd: &CommandSpec, timeout: Duration) -> bool {
    matches!(run(hal, cmd, &RunOptions::advisory(timeout)), Ok(Some(_)))
}

/// Run `cmd` where a non-zero exit is routine (`fuser` with no holders, `umount` of something
/// not mounted). The command is still echoed; its failure is only logged at debug level.
pub fn run_best_effort<H: ProcessOps + ?Sized>(
    hal: &H,
    cmd: &CommandSpec,
    timeout: Duration,
) -> bool {
    match run_outcome(hal, cmd, &RunOptions::advisory(timeout)) {
        Ok(ProcessResult::Success(_)) => true,
        Ok(other) => {
            debug!("{} -> {:?}", cmd, other.exit_code());
            false
        }
        Err(err) => {
            debug!("{} -> {}", cmd, err);
            false
        }
    }
}

/// Run `cmd` as an advisory command and hand back its captured stdout.
pub fn capture_advisory<H: ProcessOps + ?Sized>(
    hal: &H,
    cmd: &CommandSpec,
    timeout: Duration,
) -> Option<String> {
    run(hal, cmd, &RunOptions::advisory(timeout))
        .ok()
        .flatten()
        .map(|out| out.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::FakeHal;

    const BUDGET: Duration = Duration::from_secs(5);

    #[test]
    fn required_failure_is_an_error() {
        let hal = FakeHal::new();
        hal.respond("parted", ProcessResult::failure(1, "Error: unrecognised disk label"));

        let err = run_required(&hal, &CommandSpec::new("parted").arg("-s"), BUDGET).unwrap_err();
        match err {
            HalError::CommandFailed {
                program,
                code,
                stderr,
            } => {
                assert_eq!(program, "parted");
                assert_eq!(code, Some(1));
                assert!(stderr.contains("unrecognised"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn advisory_failure_returns_none() {
        let hal = FakeHal::new();
        hal.respond("wipefs", ProcessResult::failure(1, "probing failed"));

        let out = run(
            &hal,
            &CommandSpec::new("wipefs").arg("-af"),
            &RunOptions::advisory(BUDGET),
        )
        .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn required_timeout_is_reported_distinctly() {
        let hal = FakeHal::new();
        hal.respond("sync", ProcessResult::Timeout { after: BUDGET });

        let err = run_required(&hal, &CommandSpec::new("sync"), BUDGET).unwrap_err();
        assert!(matches!(
            err,
            HalError::CommandTimeout { timeout_secs: 5, .. }
        ));
    }

    #[test]
    fn advisory_timeout_continues() {
        let hal = FakeHal::new();
        hal.respond("fuser", ProcessResult::Timeout { after: BUDGET });
        assert!(!run_advisory(&hal, &CommandSpec::new("fuser"), BUDGET));
    }

    #[test]
    fn advisory_missing_tool_continues_but_required_does_not() {
        let hal = FakeHal::new();
        hal.missing_command("partprobe");
        assert!(!run_advisory(&hal, &CommandSpec::new("partprobe"), BUDGET));
        assert!(run_required(&hal, &CommandSpec::new("partprobe"), BUDGET)
            .unwrap_err()
            .is_command_not_found());
    }

    #[test]
    fn capture_returns_stdout() {
        let hal = FakeHal::new();
        hal.respond("blockdev", ProcessResult::success_with_stdout("16000000000\n"));
        let out = capture_advisory(&hal, &CommandSpec::new("blockdev"), BUDGET).unwrap();
        assert_eq!(out.trim(), "16000000000");
    }

    #[test]
    fn options_builders_compose() {
        let opts = RunOptions::required(BUDGET).streamed().unbounded();
        assert_eq!(opts.output, OutputMode::Stream);
        assert_eq!(opts.timeout, None);
        assert!(!opts.is_advisory());
    }
}
