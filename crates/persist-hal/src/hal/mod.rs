//! HAL trait definitions and implementations.
//!
//! This module defines the traits for world-touching operations and provides both a real
//! (`LinuxHal`) and a fake (`FakeHal`) implementation.

pub mod fake_hal;
pub mod host_ops;
pub mod linux_hal;
pub mod process_ops;

pub use fake_hal::{FakeHal, Operation};
pub use host_ops::{find_executable_in_path, FileKind, HostOps};
pub use linux_hal::LinuxHal;
pub use process_ops::{CommandOutput, CommandSpec, OutputMode, ProcessOps, ProcessResult};

/// Complete HAL combining all system operation traits.
pub trait SystemHal: ProcessOps + HostOps + Send + Sync {}

/// Automatically implement SystemHal for any type implementing all required traits.
impl<T> SystemHal for T where T: ProcessOps + HostOps + Send + Sync {}
