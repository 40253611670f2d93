//! Upload planning and execution.
//!
//! The planner is pure: it compares local mtimes (shifted to the device
//! epoch) with the remote index and decides upload or skip per file. The
//! executor drives a session through clock sync, indexing, and uploads,
//! creating missing remote directories lazily and at most once per run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::clock::sync_clock;
use crate::fs_enum::scan_local;
use crate::log::{TransferLog, TransferLogEntry};
use crate::logger::Logger;
use crate::options::SyncConfig;
use crate::progress::SyncProgress;
use crate::remote_index::{IndexStats, RemoteFileIndex, RemoteFolderSet, RemoteIndexer};
use crate::session::{remote_join, remote_parent, RemoteSession, SessionError};

/// Seconds between the host epoch (1970) and the device epoch (2000).
pub const DEVICE_EPOCH_OFFSET: i64 = 946_684_800;

pub fn to_device_epoch(host_secs: i64) -> i64 {
    host_secs - DEVICE_EPOCH_OFFSET
}

/// Modification time of a local file in host-epoch seconds
pub fn local_mtime(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata of {}", path.display()))?;
    Ok(FileTime::from_last_modification_time(&meta).unix_seconds())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UploadNew,
    UploadUpdated,
    Skip,
}

impl Action {
    pub fn is_upload(self) -> bool {
        !matches!(self, Action::Skip)
    }

    pub fn reason(self) -> &'static str {
        match self {
            Action::UploadNew => "new",
            Action::UploadUpdated => "updated",
            Action::Skip => "up to date",
        }
    }
}

/// Upload iff the remote copy is missing or strictly older.
pub fn decide(local_mtime: i64, remote_mtime: Option<i64>) -> Action {
    match remote_mtime {
        None => Action::UploadNew,
        Some(remote) if local_mtime > remote => Action::UploadUpdated,
        Some(_) => Action::Skip,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub rel: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    /// Device epoch
    pub local_mtime: i64,
    pub remote_mtime: Option<i64>,
    pub action: Action,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub files: Vec<PlannedFile>,
    /// Local files whose mtime could not be read
    pub unreadable: Vec<(PathBuf, String)>,
}

impl Plan {
    pub fn uploads(&self) -> impl Iterator<Item = &PlannedFile> {
        self.files.iter().filter(|f| f.action.is_upload())
    }
}

/// Normalize a configured remote root: leading `/`, no trailing `/`.
pub fn normalize_remote_root(root: &str) -> String {
    remote_join("", root)
}

pub fn plan(
    local_root: &Path,
    remote_root: &str,
    local_files: &[String],
    remote_files: &RemoteFileIndex,
) -> Plan {
    let mut out = Plan::default();
    for rel in local_files {
        let local_path = local_root.join(rel);
        let remote_path = remote_join(remote_root, rel);
        let local = match local_mtime(&local_path) {
            Ok(t) => to_device_epoch(t),
            Err(e) => {
                out.unreadable.push((local_path, format!("{:#}", e)));
                continue;
            }
        };
        let remote = remote_files.get(&remote_path).copied();
        out.files.push(PlannedFile {
            rel: rel.clone(),
            local_path,
            action: decide(local, remote),
            remote_path,
            local_mtime: local,
            remote_mtime: remote,
        });
    }
    out
}

/// Directories that must exist before `remote_path` can be written,
/// shortest first, excluding `/`.
pub fn ancestor_dirs(remote_path: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut cur = remote_parent(remote_path);
    while let Some(dir) = cur {
        if dir == "/" {
            break;
        }
        dirs.push(dir.to_string());
        cur = remote_parent(dir);
    }
    dirs.reverse();
    dirs
}

/// Lazily created remote directories for one run
#[derive(Debug, Default)]
pub struct DirCreator {
    failed: HashSet<String>,
    created: Vec<String>,
}

impl DirCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories created so far, in creation order
    pub fn created(&self) -> &[String] {
        &self.created
    }

    /// Make every missing ancestor of `remote_path`.
    ///
    /// A segment is attempted at most once per run: successes join
    /// `folders`, failures are remembered and stop the chain. A segment
    /// the device reports as already existing counts as present; the
    /// index can miss directories whose listing failed.
    pub fn ensure<S: RemoteSession + ?Sized>(
        &mut self,
        session: &mut S,
        remote_path: &str,
        folders: &mut RemoteFolderSet,
        logger: &dyn Logger,
    ) -> std::result::Result<(), (String, SessionError)> {
        for dir in ancestor_dirs(remote_path) {
            if folders.contains(&dir) {
                continue;
            }
            if self.failed.contains(&dir) {
                return Err((dir, SessionError::Protocol("creation failed earlier in this run".into())));
            }
            match session.make_directory(&dir) {
                Ok(()) => {
                    logger.mkdir(&dir);
                    folders.insert(dir.clone());
                    self.created.push(dir);
                }
                Err(e) if e.is_already_exists() => {
                    folders.insert(dir);
                }
                Err(e) => {
                    self.failed.insert(dir.clone());
                    return Err((dir, e));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Uploads a dry run would have made
    pub planned_uploads: u64,
    pub dirs_created: Vec<String>,
    pub index_stats: IndexStats,
    /// Remote folders as indexed, before any creation
    pub indexed_folders: RemoteFolderSet,
    /// Remote folders at the end of the run
    pub folders: RemoteFolderSet,
    pub clock_synced: bool,
}

impl SyncReport {
    /// No file reached the device (and a dry run found none to send).
    pub fn nothing_to_do(&self) -> bool {
        self.uploaded == 0 && self.planned_uploads == 0
    }
}

pub struct Synchronizer<'a> {
    config: &'a SyncConfig,
    logger: &'a dyn Logger,
    transfer_log: Option<TransferLog>,
    now: Option<DateTime<Utc>>,
}

impl<'a> Synchronizer<'a> {
    pub fn new(config: &'a SyncConfig, logger: &'a dyn Logger) -> Self {
        Self {
            config,
            logger,
            transfer_log: config.transfer_log.as_deref().map(TransferLog::new),
            now: None,
        }
    }

    /// Fix the time pushed to the device clock instead of reading the host clock.
    pub fn with_time(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Run one sync over an already-open session.
    pub fn run<S: RemoteSession + ?Sized>(&self, session: &mut S) -> Result<SyncReport> {
        let cfg = self.config;
        let start = Instant::now();
        let remote_root = normalize_remote_root(&cfg.remote_root);
        let mut report = SyncReport::default();
        self.logger.start(&cfg.local_root, &remote_root);

        if cfg.sync_clock {
            println!("Setting time...");
            match sync_clock(session, self.now.unwrap_or_else(Utc::now)) {
                Ok(confirmation) => {
                    report.clock_synced = true;
                    if cfg.verbose {
                        println!("Device clock: {}", confirmation);
                    }
                    self.logger.clock(&confirmation);
                }
                Err(e) => {
                    eprintln!("Warning: could not set device clock: {}", e);
                    self.logger.error("clock", "", &e.to_string());
                }
            }
        }

        println!("Scanning files...");
        let progress = SyncProgress::new(cfg.progress);
        let on_entry = |path: &str| progress.set_message(&format!("Indexing {}", path));
        let mut indexer = RemoteIndexer::new(self.logger).with_progress(&on_entry);
        let index = indexer
            .index(session, "")
            .context("Failed to list remote files")?;
        report.index_stats = indexer.stats();
        progress.set_message("Scanning local files");
        let local_files = scan_local(&cfg.local_root, &cfg.filter)?;
        progress.finish();

        if cfg.verbose {
            println!(
                "Remote: {} files in {} folders; local: {} files",
                index.files.len(),
                index.folders.len(),
                local_files.len()
            );
        }

        let plan = plan(&cfg.local_root, &remote_root, &local_files, &index.files);
        for (path, msg) in &plan.unreadable {
            eprintln!("Could not read {}: {}", path.display(), msg);
            self.logger.error("stat", &path.to_string_lossy(), msg);
            report.failed += 1;
        }

        report.indexed_folders = index.folders.clone();
        let mut folders = index.folders;
        let mut dirs = DirCreator::new();

        for file in &plan.files {
            match file.action {
                Action::Skip => {
                    report.skipped += 1;
                    self.logger.skip(&file.remote_path);
                    if cfg.verbose {
                        println!("Skipping {} (already up to date)", file.rel);
                    }
                    continue;
                }
                Action::UploadNew => println!("Uploading new file: {}", file.rel),
                Action::UploadUpdated => println!("Updating file: {}", file.rel),
            }

            if cfg.dry_run {
                report.planned_uploads += 1;
                continue;
            }

            if let Err((dir, e)) = dirs.ensure(session, &file.remote_path, &mut folders, self.logger) {
                eprintln!("Could not create folder {}: {}", dir, e);
                self.logger.error("mkdir", &dir, &e.to_string());
            }

            let outcome = session
                .put_file(&file.local_path, &file.remote_path)
                .map(|()| std::fs::metadata(&file.local_path).map(|m| m.len()).unwrap_or(0));
            match &outcome {
                Ok(bytes) => {
                    report.uploaded += 1;
                    self.logger.upload_done(&file.local_path, &file.remote_path, *bytes);
                }
                Err(e) => {
                    report.failed += 1;
                    eprintln!("Could not upload {}: {}", file.rel, e);
                    self.logger.error("put", &file.remote_path, &e.to_string());
                }
            }
            self.record_transfer(file, outcome.map_err(|e| e.to_string()));
        }

        report.dirs_created = dirs.created().to_vec();
        report.folders = folders;

        if cfg.dry_run {
            println!("Dry run: {} file(s) would be uploaded.", report.planned_uploads);
        } else if report.nothing_to_do() {
            if report.failed == 0 {
                println!("Files already up to date.");
            } else {
                println!("Nothing uploaded: {} file(s) failed.", report.failed);
            }
        } else if cfg.verbose || report.failed > 0 {
            println!("Uploaded {} file(s), {} failed.", report.uploaded, report.failed);
        }

        self.logger
            .done(report.uploaded, report.failed, start.elapsed().as_secs_f64());
        Ok(report)
    }

    fn record_transfer(&self, file: &PlannedFile, outcome: std::result::Result<u64, String>) {
        if let Some(log) = &self.transfer_log {
            let entry = TransferLogEntry::now(
                &self.config.device,
                &file.local_path,
                &file.remote_path,
                file.action.reason(),
                outcome,
            );
            if let Err(e) = log.add_entry(&entry) {
                eprintln!("Warning: could not write transfer log: {:#}", e);
            }
        }
    }
}

/// Open `session`, run one sync, and close it.
///
/// A failed open is fatal and nothing else is attempted; once open, the
/// session is closed exactly once whatever the outcome.
pub fn sync_with<S: RemoteSession + ?Sized>(
    session: &mut S,
    synchronizer: &Synchronizer<'_>,
) -> Result<SyncReport> {
    session.open().with_context(|| {
        format!(
            "Unable to connect to MicroPython device at {}",
            synchronizer.config.device
        )
    })?;
    let result = synchronizer.run(session);
    session.close();
    result
}

/// Full executor: connect to the configured device and sync.
pub fn sync_device(config: &SyncConfig, logger: &dyn Logger) -> Result<SyncReport> {
    let address = crate::url::parse_device_address(&config.device)?;
    let mut session = crate::repl::ReplSession::from_address(address, config.baud, config.timeout_secs);
    sync_with(&mut session, &Synchronizer::new(config, logger))
}
