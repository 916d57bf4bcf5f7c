//! Ctrl+C cancellation handling.

use persist_workflow::CancelFlag;
use std::sync::OnceLock;

static HANDLER_SET: OnceLock<()> = OnceLock::new();

pub fn install_ctrlc_handler<F>(on_cancel: F) -> anyhow::Result<()>
where
    F: Fn() + Send + Sync + 'static,
{
    if HANDLER_SET.get().is_some() {
        return Ok(());
    }

    ctrlc::set_handler(move || {
        on_cancel();
        log::warn!("🛑 Cancellation requested (Ctrl+C), cleaning up after the current step...");
    })?;

    let _ = HANDLER_SET.set(());
    Ok(())
}

/// Route Ctrl+C into `flag`. The running child process gets the signal too, so the current
/// stage fails promptly and the pipeline cleans up.
pub fn cancel_on_ctrlc(flag: &CancelFlag) -> anyhow::Result<()> {
    let flag = flag.clone();
    install_ctrlc_handler(move || flag.cancel())
}
