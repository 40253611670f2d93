//! The command/response channel the synchronizer drives.
//!
//! Every call is a blocking round-trip. Methods take `&mut self` so a
//! session has exactly one driver at a time; the remote cursor it carries
//! is shared state and must never see interleaved requests.

use std::path::Path;
use thiserror::Error;

use crate::protocol::GETCWD_CODE;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device raised: {}", last_line(.traceback))]
    Remote { traceback: String },

    #[error("session is not open")]
    NotOpen,
}

impl SessionError {
    /// Device-side failure carrying the interpreter's traceback
    pub fn remote(traceback: impl Into<String>) -> Self {
        SessionError::Remote {
            traceback: traceback.into(),
        }
    }

    /// `mkdir` of a directory that is already there (`EEXIST`).
    pub fn is_already_exists(&self) -> bool {
        match self {
            SessionError::Remote { traceback } => {
                let line = last_line(traceback);
                line.contains("EEXIST") || line.contains("[Errno 17]")
            }
            _ => false,
        }
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("")
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub trait RemoteSession {
    /// Establish the channel. Nothing else may be called before this succeeds.
    fn open(&mut self) -> Result<()>;

    /// Release the channel. Safe to call on a session that never opened.
    fn close(&mut self);

    /// Run interpreter code on the device and return everything it printed.
    fn execute(&mut self, code: &str) -> Result<String>;

    /// Move the remote cursor into `path` (absolute or relative).
    fn change_directory(&mut self, path: &str) -> Result<()>;

    /// Move the remote cursor to its parent.
    fn change_directory_up(&mut self) -> Result<()>;

    /// Absolute path of the cursor's current directory.
    fn current_directory(&mut self) -> Result<String> {
        let out = self.execute(GETCWD_CODE)?;
        let cwd = out.lines().map(str::trim).filter(|l| !l.is_empty()).last();
        match cwd {
            Some(cwd) if cwd.starts_with('/') => Ok(cwd.to_string()),
            _ => Err(SessionError::Protocol(format!("unexpected getcwd output {:?}", out))),
        }
    }

    /// Listing table of the cursor's current directory.
    fn list_directory(&mut self) -> Result<String>;

    /// Create one directory segment. Fails if it already exists.
    fn make_directory(&mut self, path: &str) -> Result<()>;

    /// Create or overwrite `remote` with the bytes of `local`.
    fn put_file(&mut self, local: &Path, remote: &str) -> Result<()>;
}

impl<S: RemoteSession + ?Sized> RemoteSession for &mut S {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn execute(&mut self, code: &str) -> Result<String> {
        (**self).execute(code)
    }
    fn change_directory(&mut self, path: &str) -> Result<()> {
        (**self).change_directory(path)
    }
    fn change_directory_up(&mut self) -> Result<()> {
        (**self).change_directory_up()
    }
    fn current_directory(&mut self) -> Result<String> {
        (**self).current_directory()
    }
    fn list_directory(&mut self) -> Result<String> {
        (**self).list_directory()
    }
    fn make_directory(&mut self, path: &str) -> Result<()> {
        (**self).make_directory(path)
    }
    fn put_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        (**self).put_file(local, remote)
    }
}

/// Join a remote directory and a name with `/`, collapsing doubled slashes.
///
/// `remote_join("", "a")` and `remote_join("/", "a")` both give `/a`.
pub fn remote_join(dir: &str, name: &str) -> String {
    let joined = format!("{}/{}", dir, name);
    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Parent of a remote path, or `None` for `/`.
pub fn remote_parent(path: &str) -> Option<&str> {
    if path == "/" || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}
