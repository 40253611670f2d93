//! Recursive index of the device filesystem.
//!
//! The device only lists the directory its cursor sits in, so the walk
//! physically moves the cursor. Each descent is held by a [`CursorScope`];
//! dropping the scope issues the matching `change_directory_up`, on the
//! normal path, on `?` early returns, and during unwinding.

use std::collections::{BTreeSet, HashMap};

use crate::listing::{parse_listing, parse_stat};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::stat_code;
use crate::session::{remote_join, RemoteSession, Result};

/// RemotePath -> modification time (device epoch)
pub type RemoteFileIndex = HashMap<String, i64>;

/// Remote directories known to exist. Insert-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFolderSet(BTreeSet<String>);

impl RemoteFolderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `path` was not already present.
    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.0.insert(path.into())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn extend(&mut self, other: RemoteFolderSet) {
        self.0.extend(other.0);
    }

    pub fn is_superset(&self, other: &RemoteFolderSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoteIndex {
    pub files: RemoteFileIndex,
    pub folders: RemoteFolderSet,
}

impl RemoteIndex {
    fn merge(&mut self, other: RemoteIndex) {
        self.files.extend(other.files);
        self.folders.extend(other.folders);
    }
}

/// Counters for entries the walk could not index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub files: u64,
    pub dirs: u64,
    /// Files whose stat failed or could not be decoded
    pub unreadable: u64,
    /// Subdirectories that could not be entered or listed
    pub skipped_dirs: u64,
}

/// How a [`CursorScope`] puts the cursor back when dropped.
enum Restore {
    Stay,
    Up,
    To(String),
}

/// Scoped "cursor is inside directory X" state.
pub struct CursorScope<'a, S: RemoteSession + ?Sized> {
    session: &'a mut S,
    restore: Restore,
    logger: Option<&'a dyn Logger>,
}

impl<'a, S: RemoteSession + ?Sized> CursorScope<'a, S> {
    /// Scope at the cursor's current location; exiting issues no move.
    pub fn here(session: &'a mut S) -> Self {
        Self {
            session,
            restore: Restore::Stay,
            logger: None,
        }
    }

    /// Move into `dir`, a direct child of the current directory. Exiting
    /// issues one `change_directory_up`. On failure nothing was entered
    /// and nothing is undone.
    pub fn enter(session: &'a mut S, dir: &str) -> Result<Self> {
        session.change_directory(dir)?;
        Ok(Self {
            session,
            restore: Restore::Up,
            logger: None,
        })
    }

    /// Move into any `dir`, however deep. Exiting returns the cursor to
    /// the directory it was in before.
    pub fn enter_from_here(session: &'a mut S, dir: &str) -> Result<Self> {
        let origin = session.current_directory()?;
        session.change_directory(dir)?;
        Ok(Self {
            session,
            restore: Restore::To(origin),
            logger: None,
        })
    }

    /// Report a failed restore to `logger` as well as stderr.
    pub fn with_logger(mut self, logger: &'a dyn Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn session(&mut self) -> &mut S {
        self.session
    }
}

impl<S: RemoteSession + ?Sized> Drop for CursorScope<'_, S> {
    fn drop(&mut self) {
        let (target, outcome) = match &self.restore {
            Restore::Stay => return,
            Restore::Up => ("..", self.session.change_directory_up()),
            Restore::To(origin) => (origin.as_str(), self.session.change_directory(origin)),
        };
        if let Err(e) = outcome {
            eprintln!("failed to restore remote directory {}: {}", target, e);
            if let Some(logger) = self.logger {
                logger.error("cursor", target, &e.to_string());
            }
        }
    }
}

pub struct RemoteIndexer<'a> {
    logger: &'a dyn Logger,
    on_entry: Option<&'a dyn Fn(&str)>,
    stats: IndexStats,
}

impl<'a> RemoteIndexer<'a> {
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self {
            logger,
            on_entry: None,
            stats: IndexStats::default(),
        }
    }

    /// Call `f` with each remote path as it is visited.
    pub fn with_progress(mut self, f: &'a dyn Fn(&str)) -> Self {
        self.on_entry = Some(f);
        self
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Index the tree below `directory` (`""` = the cursor's current
    /// directory, which is the device root after open). The cursor ends
    /// where it started.
    ///
    /// Only a failure to list the starting directory is returned; deeper
    /// failures skip the affected entry.
    pub fn index<S: RemoteSession + ?Sized>(
        &mut self,
        session: &mut S,
        directory: &str,
    ) -> Result<RemoteIndex> {
        let mut index = if directory.is_empty() {
            self.walk(CursorScope::here(session), directory)?
        } else {
            let scope = CursorScope::enter_from_here(session, directory)?.with_logger(self.logger);
            self.walk(scope, directory)?
        };
        index.folders.insert("/");
        Ok(index)
    }

    fn walk<S: RemoteSession + ?Sized>(
        &mut self,
        mut scope: CursorScope<'_, S>,
        directory: &str,
    ) -> Result<RemoteIndex> {
        let listing = scope.session().list_directory()?;
        let mut index = RemoteIndex::default();

        for entry in parse_listing(&listing) {
            let path = remote_join(directory, &entry.name);
            if let Some(f) = self.on_entry {
                f(&path);
            }

            if entry.is_dir() {
                self.stats.dirs += 1;
                index.folders.insert(path.clone());
                let sub = CursorScope::enter(scope.session(), &path)
                    .map(|child| child.with_logger(self.logger))
                    .and_then(|child| self.walk(child, &path));
                match sub {
                    Ok(sub) => index.merge(sub),
                    Err(e) => {
                        self.stats.skipped_dirs += 1;
                        self.logger.error("index", &path, &e.to_string());
                        eprintln!("Could not index {}: {}", path, e);
                    }
                }
            } else {
                self.stats.files += 1;
                let stat = scope
                    .session()
                    .execute(&stat_code(&path))
                    .ok()
                    .and_then(|out| parse_stat(&out));
                match stat {
                    Some(st) => {
                        index.files.insert(path, st.mtime());
                    }
                    None => {
                        self.stats.unreadable += 1;
                        self.logger.error("stat", &path, "no stat available");
                    }
                }
            }
        }

        Ok(index)
    }
}

/// `index(session, directory)` with no logging.
pub fn index_remote<S: RemoteSession + ?Sized>(
    session: &mut S,
    directory: &str,
) -> Result<RemoteIndex> {
    RemoteIndexer::new(&NoopLogger).index(session, directory)
}
