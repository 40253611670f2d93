use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Sync events; every hook defaults to a no-op.
pub trait Logger: Send + Sync {
    fn start(&self, _local: &Path, _remote: &str) {}
    fn clock(&self, _confirmation: &str) {}
    fn mkdir(&self, _remote: &str) {}
    fn upload_done(&self, _local: &Path, _remote: &str, _bytes: u64) {}
    fn skip(&self, _remote: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn done(&self, _uploaded: u64, _failed: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn start(&self, local: &Path, remote: &str) {
        self.line(&format!("START local={} remote={}", local.display(), remote));
    }
    fn clock(&self, confirmation: &str) {
        self.line(&format!("CLOCK device={}", confirmation.trim()));
    }
    fn mkdir(&self, remote: &str) {
        self.line(&format!("MKDIR path={}", remote));
    }
    fn upload_done(&self, local: &Path, remote: &str, bytes: u64) {
        self.line(&format!(
            "PUT local={} remote={} bytes={}",
            local.display(),
            remote,
            bytes
        ));
    }
    fn skip(&self, remote: &str) {
        self.line(&format!("SKIP path={}", remote));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} path={} msg={}", context, path, msg));
    }
    fn done(&self, uploaded: u64, failed: u64, seconds: f64) {
        self.line(&format!(
            "DONE uploaded={uploaded} failed={failed} seconds={seconds:.3}"
        ));
    }
}
