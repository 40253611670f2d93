//! Command-line surface of the `mpsync` binary

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "mpsync",
    author,
    version,
    about = "Sync local files to a MicroPython device"
)]
pub struct SyncArgs {
    /// MicroPython device port (e.g. COM10, /dev/ttyUSB0, ser:/dev/ttyACM0, tcp:host:port)
    pub device: String,

    /// Local directory to sync (default: current directory)
    #[arg(long = "local-dir", alias = "local_dir")]
    pub local_dir: Option<PathBuf>,

    /// Directory on the device to sync to (default: /)
    #[arg(long = "mp-dir", alias = "mp_dir")]
    pub mp_dir: Option<String>,

    /// Serial baud rate (default: 115200)
    #[arg(long)]
    pub baud: Option<u32>,

    /// Seconds to wait for the device before giving up on a request (default: 10)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not set the device clock before comparing timestamps
    #[arg(long = "no-clock")]
    pub no_clock: bool,

    /// List what would be uploaded without touching the device filesystem
    #[arg(short = 'l', long = "dry-run", alias = "list-only")]
    pub dry_run: bool,

    /// Exclude files matching patterns
    #[arg(long = "xf", action = ArgAction::Append)]
    pub exclude_files: Vec<String>,

    /// Exclude directories matching patterns
    #[arg(long = "xd", action = ArgAction::Append)]
    pub exclude_dirs: Vec<String>,

    /// Show skipped files and stage details
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable the progress spinner
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// Append event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append one JSON line per attempted upload to this file
    #[arg(long = "transfer-log")]
    pub transfer_log: Option<PathBuf>,

    /// Options file (default: mpsync.toml in the local directory, if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the effective options to the options file before syncing
    #[arg(long = "save-config")]
    pub save_config: bool,

    /// Print this device's entries from the transfer log and exit
    #[arg(long = "show-log")]
    pub show_log: bool,
}
