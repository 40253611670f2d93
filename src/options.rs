use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::SyncArgs;
use crate::fs_enum::FileFilter;
use crate::protocol::defaults;

/// Contents of an `mpsync.toml` options file. Every key is optional.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OptionsState {
    pub mp_dir: String,
    pub baud: u32,
    pub timeout_secs: u64,
    pub sync_clock: bool,
    pub verbose: bool,

    pub exclude_files: Vec<String>, // --xf
    pub exclude_dirs: Vec<String>,  // --xd

    pub log_file: Option<PathBuf>,
    pub transfer_log: Option<PathBuf>,
}

impl Default for OptionsState {
    fn default() -> Self {
        Self {
            mp_dir: defaults::REMOTE_ROOT.to_string(),
            baud: defaults::BAUD,
            timeout_secs: defaults::TIMEOUT_SECS,
            sync_clock: true,
            verbose: false,
            exclude_files: Vec::new(),
            exclude_dirs: Vec::new(),
            log_file: None,
            transfer_log: None,
        }
    }
}

impl OptionsState {
    pub fn from_toml(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file {}", path.display()))?;
        Self::from_toml(&data)
            .with_context(|| format!("Failed to parse options file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = toml::to_string(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to write options file {}", path.display()))
    }
}

/// Everything a sync run needs, resolved up front.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub device: String,
    pub local_root: PathBuf,
    pub remote_root: String,
    pub baud: u32,
    pub timeout_secs: u64,
    pub sync_clock: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub progress: bool,
    pub filter: FileFilter,
    pub log_file: Option<PathBuf>,
    pub transfer_log: Option<PathBuf>,
}

impl SyncConfig {
    /// Defaults for everything but the endpoints; no spinner.
    pub fn new(device: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        let o = OptionsState::default();
        Self {
            device: device.into(),
            local_root: local_root.into(),
            remote_root: o.mp_dir,
            baud: o.baud,
            timeout_secs: o.timeout_secs,
            sync_clock: o.sync_clock,
            dry_run: false,
            verbose: false,
            progress: false,
            filter: FileFilter::default(),
            log_file: None,
            transfer_log: None,
        }
    }

    /// Merge CLI arguments over the options file; CLI wins.
    pub fn resolve(args: &SyncArgs, file: OptionsState) -> Self {
        use std::io::IsTerminal;

        let local_root = args.local_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let mut filter = FileFilter {
            exclude_files: file.exclude_files,
            exclude_dirs: file.exclude_dirs,
        };
        filter.exclude_files.extend(args.exclude_files.iter().cloned());
        filter.exclude_dirs.extend(args.exclude_dirs.iter().cloned());

        Self {
            device: args.device.clone(),
            local_root,
            remote_root: args.mp_dir.clone().unwrap_or(file.mp_dir),
            baud: args.baud.unwrap_or(file.baud),
            timeout_secs: args.timeout.unwrap_or(file.timeout_secs),
            sync_clock: file.sync_clock && !args.no_clock,
            dry_run: args.dry_run,
            verbose: args.verbose || file.verbose,
            progress: !args.no_progress && std::io::stdout().is_terminal(),
            filter,
            log_file: args.log_file.clone().or(file.log_file),
            transfer_log: args.transfer_log.clone().or(file.transfer_log),
        }
    }
}

impl OptionsState {
    /// Options that reproduce `config` when loaded back.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            mp_dir: config.remote_root.clone(),
            baud: config.baud,
            timeout_secs: config.timeout_secs,
            sync_clock: config.sync_clock,
            verbose: config.verbose,
            exclude_files: config.filter.exclude_files.clone(),
            exclude_dirs: config.filter.exclude_dirs.clone(),
            log_file: config.log_file.clone(),
            transfer_log: config.transfer_log.clone(),
        }
    }
}

/// `--config` if given, else `mpsync.toml` in the local root.
pub fn options_path(args: &SyncArgs) -> PathBuf {
    match &args.config {
        Some(path) => path.clone(),
        None => args
            .local_dir
            .as_deref()
            .unwrap_or(Path::new("."))
            .join(defaults::OPTIONS_FILE),
    }
}

/// Options file named by `--config`, else `mpsync.toml` in the local root
/// if present, else defaults.
pub fn load_options(args: &SyncArgs) -> Result<OptionsState> {
    let path = options_path(args);
    if args.config.is_some() || path.is_file() {
        return OptionsState::load(&path);
    }
    Ok(OptionsState::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn missing_keys_take_defaults() {
        let o = OptionsState::from_toml("mp_dir = \"/app\"\nexclude_dirs = [\"__pycache__\"]\n").unwrap();
        assert_eq!(o.mp_dir, "/app");
        assert_eq!(o.baud, 115_200);
        assert!(o.sync_clock);
        assert_eq!(o.exclude_dirs, vec!["__pycache__"]);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(OptionsState::from_toml("baud = \"fast\"").is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let args = SyncArgs::parse_from([
            "mpsync", "/dev/ttyUSB0", "--mp-dir", "/lib", "--no-clock", "--xf", "*.md",
        ]);
        let file = OptionsState {
            mp_dir: "/app".into(),
            baud: 57_600,
            exclude_files: vec!["*.txt".into()],
            ..OptionsState::default()
        };
        let cfg = SyncConfig::resolve(&args, file);
        assert_eq!(cfg.remote_root, "/lib");
        assert_eq!(cfg.baud, 57_600);
        assert!(!cfg.sync_clock);
        assert_eq!(cfg.local_root, PathBuf::from("."));
        assert_eq!(cfg.filter.exclude_files, vec!["*.txt", "*.md"]);
    }

    #[test]
    fn options_file_found_in_local_root() {
        let tmp = TempDir::new().unwrap();
        let opts = OptionsState {
            timeout_secs: 3,
            ..OptionsState::default()
        };
        opts.save(&tmp.path().join("mpsync.toml")).unwrap();

        let dir = tmp.path().to_string_lossy().to_string();
        let args = SyncArgs::parse_from(["mpsync", "COM3", "--local-dir", dir.as_str()]);
        assert_eq!(load_options(&args).unwrap(), opts);

        let args = SyncArgs::parse_from(["mpsync", "COM3"]);
        let missing = SyncArgs {
            config: Some(tmp.path().join("absent.toml")),
            ..args
        };
        assert!(load_options(&missing).is_err());
    }

    #[test]
    fn saved_config_resolves_to_the_same_settings() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_string_lossy().to_string();
        let args = SyncArgs::parse_from([
            "mpsync", "COM3", "--local-dir", dir.as_str(), "--mp-dir", "/app", "--baud", "57600",
            "--no-clock", "--xd", "__pycache__", "--save-config",
        ]);
        let cfg = SyncConfig::resolve(&args, load_options(&args).unwrap());
        let path = options_path(&args);
        assert_eq!(path, tmp.path().join("mpsync.toml"));
        OptionsState::from_config(&cfg).save(&path).unwrap();

        let plain = SyncArgs::parse_from(["mpsync", "COM3", "--local-dir", dir.as_str()]);
        let again = SyncConfig::resolve(&plain, load_options(&plain).unwrap());
        assert_eq!(again.remote_root, "/app");
        assert_eq!(again.baud, 57_600);
        assert!(!again.sync_clock);
        assert_eq!(again.filter, cfg.filter);
    }
}
