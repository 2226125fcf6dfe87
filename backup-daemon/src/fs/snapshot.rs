//! Directory snapshots: path -> modification time for every file in a tree.
//!
//! A snapshot is rebuilt from scratch on every poll. Entries are kept in a
//! `BTreeMap`, so iteration is always in path order no matter what order
//! the file system reported them in.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links into directories
    pub follow_links: bool,

    /// File-name substrings to skip (a matching directory skips its subtree)
    pub exclude_patterns: Vec<String>,
}

impl WalkOptions {
    pub fn with_excludes(patterns: &[String]) -> Self {
        Self {
            follow_links: false,
            exclude_patterns: patterns.to_vec(),
        }
    }

    /// Configured walker over `root` that prunes excluded entries
    pub(crate) fn walker(&self, root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
        let patterns = self.exclude_patterns.clone();
        WalkDir::new(root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_entry(move |entry| entry.depth() == 0 || !should_exclude(entry, &patterns))
    }
}

/// Path -> modification time (since the Unix epoch) of every regular file in a tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<PathBuf, Duration>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<Duration> {
        self.entries.get(path).copied()
    }

    /// Entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&Path, Duration)> {
        self.entries.iter().map(|(p, m)| (p.as_path(), *m))
    }
}

impl FromIterator<(PathBuf, Duration)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (PathBuf, Duration)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Walk `root` and record the modification time of every regular file.
///
/// Never fails: unreadable entries are logged and skipped, and if the walk
/// breaks down part-way (root removed, permissions changed) whatever was
/// collected so far is returned. Callers that need to tell "missing root"
/// apart from "empty tree" must check the root themselves first.
///
/// # Example
/// ```no_run
/// use backup_daemon::fs::snapshot::{snapshot, WalkOptions};
/// use std::path::Path;
///
/// let snap = snapshot(Path::new("/data"), &WalkOptions::default());
/// println!("Found {} files", snap.len());
/// ```
pub fn snapshot(root: &Path, options: &WalkOptions) -> Snapshot {
    let root = match root.canonicalize() {
        Ok(root) => root,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Cannot resolve snapshot root");
            return Snapshot::default();
        }
    };

    let mut entries = BTreeMap::new();

    for entry in options.walker(&root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    path = %e.path().map(|p| p.display().to_string()).unwrap_or_default(),
                    error = %e,
                    "Skipping unreadable entry"
                );
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match file_mtime(&entry) {
            Ok(Some(mtime)) => {
                entries.insert(entry.into_path(), mtime);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Cannot read file metadata");
            }
        }
    }

    debug!(root = %root.display(), files = entries.len(), "Snapshot complete");
    Snapshot { entries }
}

/// Modification time of a regular file.
///
/// Symlinks are resolved to their target; links to directories and broken
/// links yield `None`, as do sockets, fifos and devices.
fn file_mtime(entry: &DirEntry) -> std::io::Result<Option<Duration>> {
    let metadata = if entry.path_is_symlink() && !entry.file_type().is_file() {
        match std::fs::metadata(entry.path()) {
            Ok(resolved) => resolved,
            // Broken symlink
            Err(_) => return Ok(None),
        }
    } else {
        entry.metadata()?
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    Ok(Some(modified_since_epoch(&metadata)?))
}

/// Modification time as a duration since the Unix epoch (pre-epoch clamps to zero)
pub fn modified_since_epoch(metadata: &Metadata) -> std::io::Result<Duration> {
    Ok(metadata
        .modified()?
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default())
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();

    for pattern in patterns {
        if file_name.contains(pattern.as_str()) {
            return true;
        }
    }

    false
}
