//! In-process device model.
//!
//! `MemoryDevice` keeps a filesystem in a map and answers the same text
//! formats a real board prints: listing tables, stat tuples, RTC
//! confirmations and interpreter tracebacks. Every call is recorded so
//! callers can check the exact sequence of requests.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

use crate::listing::{format_listing, EntryKind, ListingEntry, S_IFDIR};
use crate::protocol::GETCWD_CODE;
use crate::session::{remote_join, remote_parent, RemoteSession, Result, SessionError};
use crate::sync::DEVICE_EPOCH_OFFSET;

const S_IFREG: i64 = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    Execute(String),
    ChangeDirectory(String),
    ChangeDirectoryUp,
    ListDirectory,
    MakeDirectory(String),
    PutFile(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: EntryKind,
    data: Vec<u8>,
    mtime: i64,
}

#[derive(Debug)]
pub struct MemoryDevice {
    nodes: BTreeMap<String, Node>,
    cwd: String,
    open: bool,
    refuse_open: bool,
    no_rtc: bool,
    clock: i64,
    calls: Vec<Call>,
    fail_stat: HashSet<String>,
    fail_listing: HashSet<String>,
    fail_mkdir: HashSet<String>,
    fail_put: HashSet<String>,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDevice {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                kind: EntryKind::Dir,
                data: Vec::new(),
                mtime: 0,
            },
        );
        Self {
            nodes,
            cwd: "/".to_string(),
            open: false,
            refuse_open: false,
            no_rtc: false,
            clock: 0,
            calls: Vec::new(),
            fail_stat: HashSet::new(),
            fail_listing: HashSet::new(),
            fail_mkdir: HashSet::new(),
            fail_put: HashSet::new(),
        }
    }

    /// Add a directory and any missing ancestors.
    pub fn add_dir(&mut self, path: &str) {
        let mut cur = String::new();
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            cur = remote_join(&cur, seg);
            self.nodes.entry(cur.clone()).or_insert(Node {
                kind: EntryKind::Dir,
                data: Vec::new(),
                mtime: self.clock,
            });
        }
    }

    /// Add a file (creating its parents) with a device-epoch mtime.
    pub fn add_file(&mut self, path: &str, data: &[u8], mtime: i64) {
        if let Some(parent) = remote_parent(path) {
            self.add_dir(parent);
        }
        self.nodes.insert(
            path.to_string(),
            Node {
                kind: EntryKind::File,
                data: data.to_vec(),
                mtime,
            },
        );
    }

    /// Device-epoch time stamped on files written from now on.
    pub fn set_clock(&mut self, device_secs: i64) {
        self.clock = device_secs;
    }

    pub fn clock(&self) -> i64 {
        self.clock
    }

    pub fn refuse_open(&mut self) {
        self.refuse_open = true;
    }

    /// Behave like a port built without `machine.RTC`.
    pub fn remove_rtc(&mut self) {
        self.no_rtc = true;
    }

    pub fn fail_stat(&mut self, path: &str) {
        self.fail_stat.insert(path.to_string());
    }

    pub fn fail_listing(&mut self, dir: &str) {
        self.fail_listing.insert(dir.to_string());
    }

    pub fn fail_mkdir(&mut self, path: &str) {
        self.fail_mkdir.insert(path.to_string());
    }

    pub fn fail_put(&mut self, path: &str) {
        self.fail_put.insert(path.to_string());
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.get(path), Some(n) if n.kind == EntryKind::Dir)
    }

    pub fn file_data(&self, path: &str) -> Option<&[u8]> {
        self.nodes
            .get(path)
            .filter(|n| n.kind == EntryKind::File)
            .map(|n| n.data.as_slice())
    }

    pub fn file_mtime(&self, path: &str) -> Option<i64> {
        self.nodes
            .get(path)
            .filter(|n| n.kind == EntryKind::File)
            .map(|n| n.mtime)
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(SessionError::NotOpen)
        }
    }

    fn resolve(&self, path: &str) -> String {
        let mut parts: Vec<&str> = if path.starts_with('/') {
            Vec::new()
        } else {
            self.cwd.split('/').filter(|s| !s.is_empty()).collect()
        };
        for seg in path.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                s => parts.push(s),
            }
        }
        format!("/{}", parts.join("/"))
    }

    fn children(&self, dir: &str) -> Vec<ListingEntry> {
        self.nodes
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && remote_parent(p) == Some(dir))
            .map(|(p, n)| ListingEntry {
                name: p.rsplit('/').next().unwrap_or_default().to_string(),
                kind: n.kind,
            })
            .collect()
    }

    fn stat(&self, path: &str) -> Result<String> {
        let abs = self.resolve(path);
        if self.fail_stat.contains(&abs) {
            return Ok("garbage".to_string());
        }
        let node = self.nodes.get(&abs).ok_or_else(enoent)?;
        let mode = match node.kind {
            EntryKind::Dir => S_IFDIR,
            EntryKind::File => S_IFREG,
        };
        Ok(format!(
            "({}, 0, 0, 0, 0, 0, {}, {}, {}, {})\n",
            mode,
            node.data.len(),
            node.mtime,
            node.mtime,
            node.mtime
        ))
    }

    fn set_rtc(&mut self, tuple: &str) -> Result<String> {
        let fields: Vec<u32> = tuple
            .split(',')
            .map(|f| f.trim().parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| SessionError::remote("TypeError: can't convert to int"))?;
        if fields.len() != 8 {
            return Err(SessionError::remote("TypeError: requested length 8"));
        }
        let dt: NaiveDateTime = NaiveDate::from_ymd_opt(fields[0] as i32, fields[1], fields[2])
            .and_then(|d| d.and_hms_opt(fields[4], fields[5], fields[6]))
            .ok_or_else(|| SessionError::remote("ValueError: invalid date"))?;
        self.clock = dt.and_utc().timestamp() - DEVICE_EPOCH_OFFSET;
        Ok(format!("({})\n", tuple.trim()))
    }
}

fn enoent() -> SessionError {
    SessionError::remote("Traceback (most recent call last):\nOSError: [Errno 2] ENOENT")
}

fn eexist() -> SessionError {
    SessionError::remote("Traceback (most recent call last):\nOSError: [Errno 17] EEXIST")
}

/// Undo `py_str_literal`.
fn unquote(lit: &str) -> Option<String> {
    let inner = lit.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            other => out.push(other),
        }
    }
    Some(out)
}

impl RemoteSession for MemoryDevice {
    fn open(&mut self) -> Result<()> {
        self.calls.push(Call::Open);
        if self.refuse_open {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        self.open = true;
        self.cwd = "/".to_string();
        Ok(())
    }

    fn close(&mut self) {
        self.calls.push(Call::Close);
        self.open = false;
    }

    fn execute(&mut self, code: &str) -> Result<String> {
        self.calls.push(Call::Execute(code.to_string()));
        self.ensure_open()?;
        if code == GETCWD_CODE {
            return Ok(format!("{}\n", self.cwd));
        }
        if let Some(rest) = code.strip_prefix("import uos\nprint(uos.stat(") {
            let lit = rest
                .strip_suffix("))")
                .ok_or_else(|| SessionError::remote("SyntaxError: invalid syntax"))?;
            let path = unquote(lit).ok_or_else(|| SessionError::remote("SyntaxError: invalid syntax"))?;
            return self.stat(&path);
        }
        if self.no_rtc && code.contains("machine.RTC()") {
            return Err(SessionError::remote(
                "Traceback (most recent call last):\nAttributeError: 'module' object has no attribute 'RTC'",
            ));
        }
        if let Some(start) = code.find("rtc.datetime((") {
            let rest = &code[start + "rtc.datetime((".len()..];
            let end = rest
                .find("))")
                .ok_or_else(|| SessionError::remote("SyntaxError: invalid syntax"))?;
            return self.set_rtc(&rest[..end]);
        }
        Err(SessionError::remote("NameError: name isn't defined"))
    }

    fn change_directory(&mut self, path: &str) -> Result<()> {
        self.calls.push(Call::ChangeDirectory(path.to_string()));
        self.ensure_open()?;
        let abs = self.resolve(path);
        if !self.is_dir(&abs) {
            return Err(enoent());
        }
        self.cwd = abs;
        Ok(())
    }

    fn change_directory_up(&mut self) -> Result<()> {
        self.calls.push(Call::ChangeDirectoryUp);
        self.ensure_open()?;
        self.cwd = remote_parent(&self.cwd).unwrap_or("/").to_string();
        Ok(())
    }

    fn list_directory(&mut self) -> Result<String> {
        self.calls.push(Call::ListDirectory);
        self.ensure_open()?;
        if self.fail_listing.contains(&self.cwd) {
            return Err(SessionError::Timeout("listing".to_string()));
        }
        Ok(format_listing(&self.cwd, &self.children(&self.cwd)))
    }

    fn make_directory(&mut self, path: &str) -> Result<()> {
        self.calls.push(Call::MakeDirectory(path.to_string()));
        self.ensure_open()?;
        let abs = self.resolve(path);
        if self.fail_mkdir.contains(&abs) {
            return Err(SessionError::remote("OSError: [Errno 28] ENOSPC"));
        }
        if self.nodes.contains_key(&abs) {
            return Err(eexist());
        }
        match remote_parent(&abs) {
            Some(parent) if self.is_dir(parent) => {}
            _ => return Err(enoent()),
        }
        self.nodes.insert(
            abs,
            Node {
                kind: EntryKind::Dir,
                data: Vec::new(),
                mtime: self.clock,
            },
        );
        Ok(())
    }

    fn put_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.calls.push(Call::PutFile(remote.to_string()));
        self.ensure_open()?;
        let abs = self.resolve(remote);
        if self.fail_put.contains(&abs) {
            return Err(SessionError::remote("OSError: [Errno 5] EIO"));
        }
        match remote_parent(&abs) {
            Some(parent) if self.is_dir(parent) => {}
            _ => return Err(enoent()),
        }
        if self.is_dir(&abs) {
            return Err(SessionError::remote("OSError: [Errno 21] EISDIR"));
        }
        let data = std::fs::read(local)?;
        self.nodes.insert(
            abs,
            Node {
                kind: EntryKind::File,
                data,
                mtime: self.clock,
            },
        );
        Ok(())
    }
}
