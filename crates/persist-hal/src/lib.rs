//! persist-usb Hardware Abstraction Layer (HAL).
//!
//! Everything that touches the host goes through here: external commands (with a
//! required/advisory policy and timeouts), mount state, and partition node naming.
//! `LinuxHal` is the real backend; `FakeHal` records commands for tests.

pub mod error;
pub mod guards;
pub mod hal;
pub mod mounts;
pub mod path;
pub mod procfs;
pub mod process;
pub mod retry;

pub use error::{HalError, HalResult};
pub use guards::MountGuard;
pub use hal::{
    find_executable_in_path, CommandOutput, CommandSpec, FakeHal, FileKind, HostOps, LinuxHal,
    Operation, OutputMode, ProcessOps, ProcessResult, SystemHal,
};
pub use mounts::{Cleanup, DeviceRelease, MountManager, MountOptions, MountSettings};
pub use path::partition_path;
pub use process::{
    capture_advisory, run, run_advisory, run_best_effort, run_outcome, run_required, Requirement,
    RunOptions,
};
pub use retry::{Attempt, RetryPolicy};
