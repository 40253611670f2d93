//! mpsync - push a local directory onto a MicroPython device
//!
//! Only files that are missing on the device or newer locally are sent.
//! Files that exist only on the device are left alone.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;

use mpsync::cli::SyncArgs;
use mpsync::log::TransferLog;
use mpsync::logger::{Logger, NoopLogger, TextLogger};
use mpsync::options::{load_options, options_path, OptionsState, SyncConfig};
use mpsync::sync::sync_device;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let args = SyncArgs::parse();
    let options = load_options(&args)?;
    let config = SyncConfig::resolve(&args, options);

    if args.show_log {
        let path = config
            .transfer_log
            .as_deref()
            .context("--show-log needs --transfer-log or transfer_log in the options file")?;
        for entry in TransferLog::new(path).entries_for_device(&config.device)? {
            println!("{}", entry);
        }
        return Ok(());
    }

    if !config.local_root.is_dir() {
        bail!(
            "Error: Local directory does not exist: {}",
            config.local_root.display()
        );
    }

    if args.save_config {
        let path = options_path(&args);
        OptionsState::from_config(&config).save(&path)?;
        println!("Saved options to {}", path.display());
    }

    // Choose logger once; NoopLogger when no log file is requested
    let logger: Arc<dyn Logger> = if let Some(ref p) = config.log_file {
        match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {}", p.display(), e);
                Arc::new(NoopLogger)
            }
        }
    } else {
        Arc::new(NoopLogger)
    };

    if config.verbose {
        println!("mpsync {}", env!("CARGO_PKG_VERSION"));
        println!("Device: {}", config.device);
        println!("Local: {}", config.local_root.display());
        println!("Remote: {}", config.remote_root);
        if !config.filter.is_empty() {
            println!(
                "Excluding files {:?}, directories {:?}",
                config.filter.exclude_files, config.filter.exclude_dirs
            );
        }
        if config.dry_run {
            println!("DRY RUN MODE - No files will be uploaded");
        }
    }

    sync_device(&config, logger.as_ref())?;
    Ok(())
}
