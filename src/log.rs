use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::fs::{OpenOptions, File};
use std::io::{BufReader, BufWriter, Write, BufRead};
use anyhow::{Result, Context};
use chrono::Utc;
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub device: String,
    pub source: PathBuf,
    pub destination: String,
    pub reason: String,
    pub status: TransferStatus,
    pub bytes: u64,
    pub error: Option<String>,
}

impl TransferLogEntry {
    pub fn now(
        device: &str,
        source: &Path,
        destination: &str,
        reason: &str,
        outcome: std::result::Result<u64, String>,
    ) -> Self {
        let (status, bytes, error) = match outcome {
            Ok(bytes) => (TransferStatus::Completed, bytes, None),
            Err(e) => (TransferStatus::Failed, 0, Some(e)),
        };
        TransferLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            device: device.to_string(),
            source: source.to_path_buf(),
            destination: destination.to_string(),
            reason: reason.to_string(),
            status,
            bytes,
            error,
        }
    }
}

/// Append-only JSONL record of attempted uploads
pub struct TransferLog {
    log_file_path: PathBuf,
}

impl TransferLog {
    pub fn new(path: &Path) -> Self {
        TransferLog { log_file_path: path.to_path_buf() }
    }

    pub fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransferLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Entries written for `device`, oldest first
    pub fn entries_for_device(&self, device: &str) -> Result<Vec<TransferLogEntry>> {
        let mut entries = self.read_log()?;
        entries.retain(|e| e.device == device);
        Ok(entries)
    }
}

impl fmt::Display for TransferLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {} {} -> {}",
            self.timestamp,
            self.status,
            self.reason,
            self.source.display(),
            self.destination
        )?;
        match &self.error {
            Some(e) => write!(f, " ({})", e),
            None => write!(f, " ({} bytes)", self.bytes),
        }
    }
}
