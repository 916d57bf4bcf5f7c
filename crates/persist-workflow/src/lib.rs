//! persist-usb workflow orchestration.
//!
//! Validation, layout planning and the ordered provisioning pipeline, all driven through the
//! `persist-hal` traits so the whole flow can run against `FakeHal` in tests.

pub mod cancel;
pub mod config;
pub mod device;
pub mod errors;
pub mod layout;
pub mod partition;
pub mod pipeline;
pub mod preflight;
pub mod report;
pub mod stage_runner;
pub mod stages;

pub use cancel::CancelFlag;
pub use config::{CommandTimeouts, LayoutConfig, MountPaths, ProvisionConfig, Timings};
pub use errors::{ProvisionError, ValidationError};
pub use layout::{compute_layout, partition_names, PartitionLayout, PartitionNames};
pub use pipeline::{Pipeline, ProvisionReport, ProvisionState};
pub use stage_runner::StageName;
