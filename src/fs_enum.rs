//! Local tree enumeration

use anyhow::{bail, Result};
use std::path::Path;

/// Exclusion patterns applied while scanning the local tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFilter {
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl FileFilter {
    pub fn is_empty(&self) -> bool {
        self.exclude_files.is_empty() && self.exclude_dirs.is_empty()
    }

    /// Check if a file should be included
    fn should_include_file(&self, path: &Path) -> bool {
        let filename = path.file_name().unwrap_or_default().to_string_lossy();
        !self
            .exclude_files
            .iter()
            .any(|pattern| glob_match(pattern, &filename))
    }

    /// Check if a directory should be included
    fn should_include_dir(&self, rel: &Path) -> bool {
        for pattern in &self.exclude_dirs {
            // Any component may match, like rsync/robocopy
            for component in rel.components() {
                if let Some(component_str) = component.as_os_str().to_str() {
                    if glob_match(pattern, component_str) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Simple glob matching (supports * wildcards)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.contains('*') {
        if pattern.len() > 1 && pattern.starts_with('*') && pattern.ends_with('*') {
            let middle = &pattern[1..pattern.len() - 1];
            return text.contains(middle);
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            return text.ends_with(suffix);
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            return text.starts_with(prefix);
        }
    }

    pattern == text
}

/// Every regular file under `root` as a root-relative, `/`-separated path.
///
/// Symlinks are not followed and empty directories contribute nothing.
/// Output is sorted by file name at each level so runs are repeatable.
pub fn scan_local(root: &Path, filter: &FileFilter) -> Result<Vec<String>> {
    use walkdir::WalkDir;

    if !root.is_dir() {
        bail!("local directory does not exist: {}", root.display());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            // Prune excluded directories instead of filtering their files
            if e.depth() > 0 && e.file_type().is_dir() {
                let rel = e.path().strip_prefix(root).unwrap_or(e.path());
                filter.should_include_dir(rel)
            } else {
                true
            }
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || !filter.should_include_file(entry.path()) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(to_slash_path(rel));
        }
    }

    Ok(files)
}

/// Render a relative path with `/` separators whatever the host uses.
pub fn to_slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
