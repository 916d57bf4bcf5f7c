//! persist-usb: turn a live Linux image and a USB stick into a bootable, persistent system.
//!
//! `run` is the process entry point. `execute` holds the whole flow with the HAL, the
//! cancel flag and the confirmation reader injected, so it runs against `FakeHal` in tests.

pub mod cli;
pub mod logging;
pub mod ui;

use anyhow::Result;
use log::{error, warn};
use persist_hal::{LinuxHal, SystemHal};
use persist_workflow::device::{validate_device, validate_image};
use persist_workflow::preflight::{check_root, ensure_tools};
use persist_workflow::report::{destructive_warning, show_device_info, success_banner};
use persist_workflow::{CancelFlag, Pipeline, ProvisionError, ProvisionReport};
use std::process::ExitCode;

use crate::cli::Cli;
use crate::ui::confirm::{confirm_typed_with, CONFIRM_PROMPT};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Provisioned(ProvisionReport),
    /// The user did not type the confirmation token; the device was not touched.
    Declined,
}

pub fn run() -> ExitCode {
    let cli = match cli::parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(code) => return ExitCode::from(code),
    };
    logging::init_with(cli.log_file.as_deref());

    let cancel = CancelFlag::new();
    if let Err(err) = ui::cancel::cancel_on_ctrlc(&cancel) {
        warn!("⚠️  Could not install Ctrl+C handler: {}", err);
    }

    let hal = LinuxHal::new();
    let result = execute(&cli, &hal, &cancel, ui::confirm::read_typed_confirmation);
    ExitCode::from(exit_code(&result))
}

/// Map a finished run onto the process exit status, reporting failures on the way.
pub fn exit_code(result: &Result<Outcome>) -> u8 {
    match result {
        Ok(_) => EXIT_SUCCESS,
        Err(err) => {
            if matches!(
                err.downcast_ref::<ProvisionError>(),
                Some(ProvisionError::Cancelled)
            ) {
                eprintln!("\n\n🛑 Cancelled by user");
            } else {
                eprintln!("\n\n❌ Error: {:#}", err);
            }
            error!("{:#}", err);
            EXIT_FAILURE
        }
    }
}

pub fn execute<R>(
    cli: &Cli,
    hal: &dyn SystemHal,
    cancel: &CancelFlag,
    read_confirmation: R,
) -> Result<Outcome>
where
    R: FnOnce(&str) -> Result<String>,
{
    let config = cli.config();
    print_header();

    check_root(hal)?;
    validate_image(hal, &cli.image, config.small_image_bytes)?;
    validate_device(
        hal,
        &cli.device,
        &config.protected_mounts,
        config.timeouts.query,
    )?;

    println!(
        "\n{}",
        show_device_info(hal, &cli.device, config.timeouts.query).render()
    );
    println!("\n{}\n", destructive_warning(&cli.device, &cli.image));

    if !confirm_typed_with(CONFIRM_PROMPT, read_confirmation)? {
        println!("❌ Operation cancelled");
        return Ok(Outcome::Declined);
    }
    cancel.check()?;

    let rule = "=".repeat(70);
    println!("\n{rule}\n  🚀 Starting USB creation...\n{rule}");

    ensure_tools(hal, &config.required_tools, &config.timeouts)?;
    let report = Pipeline::new(hal, &config, cancel).run(&cli.image, &cli.device)?;

    println!("\n{}", success_banner(&cli.device));
    Ok(Outcome::Provisioned(report))
}

fn print_header() {
    let rule = "=".repeat(70);
    println!("{rule}");
    println!("  🌳 Btrfs Persistent USB Creator");
    println!("  Portable Linux System with Full Session Persistence");
    println!("{rule}");
}
