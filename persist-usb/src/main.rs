use std::process::ExitCode;

fn main() -> ExitCode {
    persist_usb::run()
}
