use crate::cancel::CancelFlag;
use crate::errors::ProvisionError;
use anyhow::Result;
use log::{error, info};
use persist_hal::Cleanup;
use std::fmt;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    UnmountAll,
    CreatePartitions,
    SetupSubvolumes,
    CopyImage,
    ConfigurePersistence,
    InstallBootloader,
    CreateReadme,
    FinalCleanup,
}

impl StageName {
    pub const ALL: [StageName; 8] = [
        StageName::UnmountAll,
        StageName::CreatePartitions,
        StageName::SetupSubvolumes,
        StageName::CopyImage,
        StageName::ConfigurePersistence,
        StageName::InstallBootloader,
        StageName::CreateReadme,
        StageName::FinalCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::UnmountAll => "unmount-all",
            StageName::CreatePartitions => "create-partitions",
            StageName::SetupSubvolumes => "setup-subvolumes",
            StageName::CopyImage => "copy-image",
            StageName::ConfigurePersistence => "configure-persistence",
            StageName::InstallBootloader => "install-bootloader",
            StageName::CreateReadme => "create-readme",
            StageName::FinalCleanup => "final-cleanup",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type StageFn<'a, S> = Box<dyn Fn(&mut S) -> Result<()> + 'a>;

pub struct StageDefinition<'a, S> {
    pub name: StageName,
    pub run: StageFn<'a, S>,
}

pub trait WorkflowState {
    fn set_current(&mut self, stage: StageName);
    fn mark_completed(&mut self, stage: StageName);
}

/// Runs stages strictly in order. The first failure (or a pending cancellation) runs the
/// cleanup once and stops the workflow.
pub struct StageRunner<'a> {
    cancel: &'a CancelFlag,
    cleanup: &'a dyn Cleanup,
}

impl<'a> StageRunner<'a> {
    pub fn new(cancel: &'a CancelFlag, cleanup: &'a dyn Cleanup) -> Self {
        Self { cancel, cleanup }
    }

    pub fn run<S: WorkflowState>(
        &self,
        state: &mut S,
        stages: &[StageDefinition<'_, S>],
    ) -> Result<()> {
        for stage in stages {
            if let Err(err) = self.cancel.check() {
                return Err(self.abort(stage.name, err.into()));
            }

            state.set_current(stage.name);
            info!("📍 Starting stage: {}", stage.name);

            if let Err(err) = (stage.run)(state) {
                return Err(self.abort(stage.name, err));
            }

            state.mark_completed(stage.name);
            info!("✅ Completed stage: {}", stage.name);
        }
        Ok(())
    }

    fn abort(&self, stage: StageName, err: anyhow::Error) -> anyhow::Error {
        // An interrupt usually surfaces as a failed child process; report it as what it is.
        let already_typed = err.downcast_ref::<ProvisionError>().is_some();
        let err = if self.cancel.is_cancelled() && !already_typed {
            err.context(ProvisionError::Cancelled)
        } else {
            err
        };
        error!("❌ Stage {} failed: {:#}", stage, err);
        info!("🧹 Cleaning up...");
        self.cleanup.cleanup();
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct TestState {
        current: Option<StageName>,
        completed: Vec<StageName>,
    }

    impl WorkflowState for TestState {
        fn set_current(&mut self, stage: StageName) {
            self.current = Some(stage);
        }

        fn mark_completed(&mut self, stage: StageName) {
            self.completed.push(stage);
        }
    }

    #[derive(Default)]
    struct CountingCleanup(Cell<u32>);

    impl Cleanup for CountingCleanup {
        fn cleanup(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn ok_stage<'a>(
        name: StageName,
        calls: &Arc<Mutex<Vec<StageName>>>,
    ) -> StageDefinition<'a, TestState> {
        let calls = Arc::clone(calls);
        StageDefinition {
            name,
            run: Box::new(move |_state| {
                calls.lock().unwrap().push(name);
                Ok(())
            }),
        }
    }

    #[test]
    fn runner_executes_in_order_without_cleanup() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let stages = vec![
            ok_stage(StageName::UnmountAll, &calls),
            ok_stage(StageName::CreatePartitions, &calls),
        ];
        let cancel = CancelFlag::new();
        let cleanup = CountingCleanup::default();
        let mut state = TestState::default();

        StageRunner::new(&cancel, &cleanup)
            .run(&mut state, &stages)
            .unwrap();

        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[StageName::UnmountAll, StageName::CreatePartitions]
        );
        assert_eq!(state.completed.len(), 2);
        assert_eq!(cleanup.0.get(), 0);
    }

    #[test]
    fn failure_stops_pipeline_and_cleans_up_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let stages = vec![
            ok_stage(StageName::UnmountAll, &calls),
            StageDefinition {
                name: StageName::CopyImage,
                run: Box::new(|_state| anyhow::bail!("rsync exploded")),
            },
            ok_stage(StageName::ConfigurePersistence, &calls),
        ];
        let cancel = CancelFlag::new();
        let cleanup = CountingCleanup::default();
        let mut state = TestState::default();

        let err = StageRunner::new(&cancel, &cleanup)
            .run(&mut state, &stages)
            .unwrap_err();

        assert!(err.to_string().contains("rsync exploded"));
        assert_eq!(state.completed, vec![StageName::UnmountAll]);
        assert_eq!(state.current, Some(StageName::CopyImage));
        assert_eq!(cleanup.0.get(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancellation_is_checked_between_stages() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let stages = vec![
            StageDefinition {
                name: StageName::UnmountAll,
                run: Box::new(move |_state: &mut TestState| {
                    trigger.cancel();
                    Ok(())
                }),
            },
            StageDefinition {
                name: StageName::CreatePartitions,
                run: Box::new(|_state| panic!("must not run after cancellation")),
            },
        ];
        let cleanup = CountingCleanup::default();
        let mut state = TestState::default();

        let err = StageRunner::new(&cancel, &cleanup)
            .run(&mut state, &stages)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Cancelled)
        ));
        assert_eq!(cleanup.0.get(), 1);
    }

    #[test]
    fn failure_during_cancellation_reports_cancelled() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let stages = vec![StageDefinition {
            name: StageName::CopyImage,
            run: Box::new(move |_state: &mut TestState| {
                trigger.cancel();
                anyhow::bail!("rsync killed by signal")
            }),
        }];
        let cleanup = CountingCleanup::default();
        let mut state = TestState::default();

        let err = StageRunner::new(&cancel, &cleanup)
            .run(&mut state, &stages)
            .unwrap_err();
        assert_eq!(err.to_string(), "Cancelled by user");
        assert!(format!("{err:#}").contains("rsync killed by signal"));
        assert_eq!(cleanup.0.get(), 1);
    }
}
