use clap::Parser;
use persist_workflow::config::DEFAULT_MOUNT_ROOT;
use persist_workflow::{LayoutConfig, ProvisionConfig};
use std::ffi::OsString;
use std::path::PathBuf;

/// FAT32 needs at least this much room for a usable ESP.
const MIN_ESP_MIB: u64 = 32;
const MAX_ESP_MIB: u64 = 64 * 1024;
const MAX_BOOT_GIB: u64 = 1024;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "🌳 Btrfs persistent USB creator",
    after_help = "Examples:\n  sudo persist-usb debian-13.1.0-amd64-netinst.iso /dev/sdb\n  sudo persist-usb ubuntu-22.04-desktop-amd64.iso /dev/sdc"
)]
pub struct Cli {
    /// Bootable live image (ISO) to copy onto the stick
    pub image: PathBuf,

    /// Target block device; everything on it is erased
    pub device: PathBuf,

    /// Directory holding the temporary mount points
    #[arg(long, default_value = DEFAULT_MOUNT_ROOT)]
    pub mount_root: PathBuf,

    /// Size of the EFI system partition
    #[arg(
        long,
        default_value_t = LayoutConfig::default().esp_size_mib,
        value_parser = clap::value_parser!(u64).range(MIN_ESP_MIB..=MAX_ESP_MIB)
    )]
    pub esp_size_mib: u64,

    /// Size of the boot partition holding the image contents
    #[arg(
        long,
        default_value_t = LayoutConfig::default().boot_size_gib,
        value_parser = clap::value_parser!(u64).range(1..=MAX_BOOT_GIB)
    )]
    pub boot_size_gib: u64,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn config(&self) -> ProvisionConfig {
        ProvisionConfig::new(&self.mount_root).with_layout(LayoutConfig {
            esp_size_mib: self.esp_size_mib,
            boot_size_gib: self.boot_size_gib,
            ..LayoutConfig::default()
        })
    }
}

/// Parse `args`, mapping clap's outcome onto this tool's exit codes.
///
/// Help and version requests are `Err(0)`; usage errors are `Err(1)`. The message is
/// printed either way.
pub fn parse_from<I, T>(args: I) -> Result<Cli, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|err| {
        let _ = err.print();
        if err.use_stderr() {
            1
        } else {
            0
        }
    })
}
