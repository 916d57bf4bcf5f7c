//! Provisioning Pipeline: the ordered, fail-fast stage sequence.
//!
//! Any stage error (or an interrupt) runs the device-wide unmount sweep exactly once before the
//! error is returned, so a failed run never leaves the device mounted.

use crate::cancel::CancelFlag;
use crate::config::ProvisionConfig;
use crate::layout::compute_layout;
use crate::stage_runner::{StageDefinition, StageFn, StageName, StageRunner, WorkflowState};
use crate::stages::{self, StageContext};
use anyhow::Result;
use log::{info, warn};
use persist_hal::{DeviceRelease, MountManager, SystemHal};
use std::path::Path;

/// Progress of one provisioning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionState {
    pub current: Option<StageName>,
    pub completed: Vec<StageName>,
    /// Advisory failures worth repeating in the final report.
    pub warnings: Vec<String>,
}

impl ProvisionState {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl WorkflowState for ProvisionState {
    fn set_current(&mut self, stage: StageName) {
        self.current = Some(stage);
    }

    fn mark_completed(&mut self, stage: StageName) {
        self.current = None;
        self.completed.push(stage);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub completed: Vec<StageName>,
    pub warnings: Vec<String>,
}

pub struct Pipeline<'a> {
    hal: &'a dyn SystemHal,
    config: &'a ProvisionConfig,
    cancel: &'a CancelFlag,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        hal: &'a dyn SystemHal,
        config: &'a ProvisionConfig,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            hal,
            config,
            cancel,
        }
    }

    /// Run every stage against `device`, sourcing files from `image`.
    ///
    /// Callers validate both paths and obtain confirmation first; this erases the device.
    pub fn run(&self, image: &Path, device: &Path) -> Result<ProvisionReport> {
        let mounts = MountManager::new(self.hal, self.config.mount_settings());
        let layout = compute_layout(device, &self.config.layout);
        let ctx = StageContext {
            hal: self.hal,
            mounts: &mounts,
            config: self.config,
            layout: &layout,
            image,
            cancel: self.cancel,
        };

        let stages = stage_definitions(&ctx);
        let release = DeviceRelease::new(&mounts, device);
        let mut state = ProvisionState::default();

        info!("🚀 Starting USB creation on {}", device.display());
        StageRunner::new(self.cancel, &release).run(&mut state, &stages)?;

        for warning in &state.warnings {
            warn!("⚠️  {}", warning);
        }
        info!(
            "✅ Completed stages: {}",
            state
                .completed
                .iter()
                .map(StageName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(ProvisionReport {
            completed: state.completed,
            warnings: state.warnings,
        })
    }
}

fn stage_definitions<'c>(ctx: &'c StageContext<'c>) -> Vec<StageDefinition<'c, ProvisionState>> {
    StageName::ALL
        .iter()
        .map(|&name| StageDefinition {
            name,
            run: stage_fn(ctx, name),
        })
        .collect()
}

fn stage_fn<'c>(
    ctx: &'c StageContext<'c>,
    name: StageName,
) -> StageFn<'c, ProvisionState> {
    match name {
        StageName::UnmountAll => Box::new(move |_| stages::unmount_all(ctx)),
        StageName::CreatePartitions => Box::new(move |_| stages::create_partitions(ctx)),
        StageName::SetupSubvolumes => Box::new(move |s| stages::setup_subvolumes(ctx, s)),
        StageName::CopyImage => Box::new(move |_| stages::copy_image(ctx)),
        StageName::ConfigurePersistence => {
            Box::new(move |s| stages::configure_persistence(ctx, s))
        }
        StageName::InstallBootloader => Box::new(move |s| stages::install_bootloader(ctx, s)),
        StageName::CreateReadme => Box::new(move |s| stages::create_readme(ctx, s)),
        StageName::FinalCleanup => Box::new(move |_| stages::final_cleanup(ctx)),
    }
}
