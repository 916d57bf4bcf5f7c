//! Fake HAL implementation for testing.
//!
//! This implementation records every command without executing it and simulates just enough
//! host state (mounted paths, busy mounts, device nodes, tool availability) for the whole
//! provisioning pipeline to run in CI without root privileges or real hardware.

use super::{CommandSpec, FileKind, HostOps, OutputMode, ProcessOps, ProcessResult};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Command {
        program: String,
        args: Vec<String>,
        mode: OutputMode,
        timeout_secs: Option<u64>,
    },
}

impl Operation {
    pub fn program(&self) -> &str {
        match self {
            Operation::Command { program, .. } => program,
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            Operation::Command { args, .. } => args,
        }
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Result(ProcessResult),
    NotFound,
}

#[derive(Debug, Clone)]
struct Script {
    program: String,
    arg: Option<String>,
    response: Scripted,
    remaining: Option<u32>,
}

impl Script {
    fn matches(&self, cmd: &CommandSpec) -> bool {
        self.program == cmd.program
            && self.remaining != Some(0)
            && self.arg.as_deref().map_or(true, |a| cmd.has_arg(a))
    }
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone)]
struct FakeHalState {
    operations: Vec<Operation>,
    mounted_paths: HashSet<PathBuf>,
    /// Remaining plain `umount` attempts that fail with "target is busy".
    busy: HashMap<PathBuf, u32>,
    scripts: Vec<Script>,
    files: HashMap<PathBuf, FileKind>,
    mount_table: Option<String>,
    missing_executables: HashSet<String>,
    root: bool,
}

impl Default for FakeHalState {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            mounted_paths: HashSet::new(),
            busy: HashMap::new(),
            scripts: Vec::new(),
            files: HashMap::new(),
            mount_table: None,
            missing_executables: HashSet::new(),
            root: true,
        }
    }
}

/// Fake HAL implementation that records operations without executing them.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeHalState> {
        // A panicking test thread must not hide the recorded state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    pub fn operation_count(&self) -> usize {
        self.lock().operations.len()
    }

    /// Recorded commands for `program`, as argument vectors.
    pub fn commands_for(&self, program: &str) -> Vec<Vec<String>> {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.program() == program)
            .map(|op| op.args().to_vec())
            .collect()
    }

    /// Recorded command lines in order, rendered like the runner echoes them.
    pub fn command_lines(&self) -> Vec<String> {
        self.lock()
            .operations
            .iter()
            .map(|op| {
                CommandSpec::new(op.program())
                    .args(op.args().iter().cloned())
                    .to_string()
            })
            .collect()
    }

    /// Clear recorded operations and simulated mounts.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    pub fn with_file(self, path: impl Into<PathBuf>, kind: FileKind) -> Self {
        self.lock().files.insert(path.into(), kind);
        self
    }

    pub fn with_block_device(self, path: impl Into<PathBuf>) -> Self {
        self.with_file(path, FileKind::BlockDevice)
    }

    pub fn set_root(&self, root: bool) {
        self.lock().root = root;
    }

    pub fn set_missing_executables(&self, names: &[&str]) {
        self.lock().missing_executables = names.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_mount_table(&self, content: impl Into<String>) {
        self.lock().mount_table = Some(content.into());
    }

    pub fn set_mounted(&self, path: impl Into<PathBuf>) {
        self.lock().mounted_paths.insert(path.into());
    }

    pub fn is_path_mounted(&self, path: &Path) -> bool {
        self.lock().mounted_paths.contains(path)
    }

    pub fn mounted_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().mounted_paths.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Make the next `attempts` plain unmounts of `path` fail as busy.
    pub fn set_busy(&self, path: impl Into<PathBuf>, attempts: u32) {
        self.lock().busy.insert(path.into(), attempts);
    }

    /// Every invocation of `program` returns `result`.
    pub fn respond(&self, program: &str, result: ProcessResult) {
        self.push_script(program, None, Scripted::Result(result), None);
    }

    /// Invocations of `program` carrying `arg` return `result`.
    pub fn respond_when(&self, program: &str, arg: &str, result: ProcessResult) {
        self.push_script(program, Some(arg), Scripted::Result(result), None);
    }

    /// The next `times` invocations of `program` return `result`.
    pub fn respond_times(&self, program: &str, result: ProcessResult, times: u32) {
        self.push_script(program, None, Scripted::Result(result), Some(times));
    }

    /// `program` behaves as if it is not installed.
    pub fn missing_command(&self, program: &str) {
        self.push_script(program, None, Scripted::NotFound, None);
    }

    fn push_script(
        &self,
        program: &str,
        arg: Option<&str>,
        response: Scripted,
        remaining: Option<u32>,
    ) {
        // Newest script wins, so tests can override earlier defaults.
        self.lock().scripts.insert(
            0,
            Script {
                program: program.to_string(),
                arg: arg.map(String::from),
                response,
                remaining,
            },
        );
    }

    fn take_script(state: &mut FakeHalState, cmd: &CommandSpec) -> Option<Scripted> {
        let script = state.scripts.iter_mut().find(|s| s.matches(cmd))?;
        if let Some(remaining) = script.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(script.response.clone())
    }

    fn simulate(state: &mut FakeHalState, cmd: &CommandSpec) -> ProcessResult {
        let target = cmd.last_arg().map(PathBuf::from);
        match (cmd.program.as_str(), target) {
            ("mountpoint", Some(target)) => {
                if state.mounted_paths.contains(&target) {
                    ProcessResult::success()
                } else {
                    ProcessResult::failure(32, "")
                }
            }
            ("mount", Some(target)) => {
                state.mounted_paths.insert(target);
                ProcessResult::success()
            }
            ("umount", Some(target)) => {
                if !cmd.has_arg("-l") {
                    if let Some(left) = state.busy.get_mut(&target) {
                        if *left > 0 {
                            *left -= 1;
                            return ProcessResult::failure(
                                32,
                                format!("umount: {}: target is busy.", target.display()),
                            );
                        }
                    }
                }
                state.mounted_paths.remove(&target);
                ProcessResult::success()
            }
            _ => ProcessResult::success(),
        }
    }

    fn synthesized_mount_table(state: &FakeHalState) -> String {
        let mut paths: Vec<&PathBuf> = state.mounted_paths.iter().collect();
        paths.sort();
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let escaped = p.display().to_string().replace(' ', "\\040");
                format!("{} 1 0:{} / {} rw - fake fake rw\n", 100 + i, i, escaped)
            })
            .collect()
    }
}

impl ProcessOps for FakeHal {
    fn execute(
        &self,
        cmd: &CommandSpec,
        mode: OutputMode,
        timeout: Option<Duration>,
    ) -> HalResult<ProcessResult> {
        let mut state = self.lock();
        state.operations.push(Operation::Command {
            program: cmd.program.clone(),
            args: cmd.args.clone(),
            mode,
            timeout_secs: timeout.map(|t| t.as_secs()),
        });
        log::debug!("FAKE HAL: {}", cmd);

        match Self::take_script(&mut state, cmd) {
            Some(Scripted::NotFound) => Err(HalError::CommandNotFound(cmd.program.clone())),
            Some(Scripted::Result(result)) => Ok(result),
            None => Ok(Self::simulate(&mut state, cmd)),
        }
    }
}

impl HostOps for FakeHal {
    fn file_kind(&self, path: &Path) -> FileKind {
        if let Some(kind) = self.lock().files.get(path) {
            return *kind;
        }
        FileKind::of(path)
    }

    fn file_size(&self, path: &Path) -> HalResult<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn mount_table(&self) -> HalResult<String> {
        let state = self.lock();
        Ok(state
            .mount_table
            .clone()
            .unwrap_or_else(|| Self::synthesized_mount_table(&state)))
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        if self.lock().missing_executables.contains(name) {
            return None;
        }
        Some(Path::new("/usr/bin").join(name))
    }

    fn is_root(&self) -> bool {
        self.lock().root
    }
}
