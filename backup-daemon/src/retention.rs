//! Time-based pruning of old archives.

use crate::archive::archive_date;
use crate::fs::snapshot::{snapshot, WalkOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Outcome of one pruning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Archives deleted
    pub removed: usize,
    /// Archives left in place
    pub kept: usize,
    /// Archives that were due for deletion but could not be removed
    pub failed: usize,
}

/// Delete archives in `destination_root` older than `max_age`.
pub fn prune(destination_root: &Path, max_age: Duration) -> PruneReport {
    prune_at(destination_root, max_age, SystemTime::now())
}

/// [`prune`] with an explicit notion of "now".
///
/// Only files named like archives are considered. An archive is stale when
/// its age is strictly greater than `max_age`. If every archive is stale the
/// newest one is kept, so the destination never ends up without a backup.
pub fn prune_at(destination_root: &Path, max_age: Duration, now: SystemTime) -> PruneReport {
    let now = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    let mut archives: Vec<(PathBuf, Duration)> = snapshot(destination_root, &WalkOptions::default())
        .iter()
        .filter(|(path, _)| is_archive(path))
        .map(|(path, mtime)| (path.to_path_buf(), mtime))
        .collect();

    // Oldest first
    archives.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut stale: Vec<&(PathBuf, Duration)> = archives
        .iter()
        .filter(|(_, mtime)| now.saturating_sub(*mtime) > max_age)
        .collect();

    if !archives.is_empty() && stale.len() == archives.len() {
        if let Some((newest, _)) = stale.pop() {
            info!(
                archive = %newest.display(),
                "All archives are past retention, keeping the newest"
            );
        }
    }

    let mut report = PruneReport {
        kept: archives.len() - stale.len(),
        ..PruneReport::default()
    };

    for (path, mtime) in stale {
        let age_hours = now.saturating_sub(*mtime).as_secs() / 3600;
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(archive = %path.display(), age_hours, "Removed archive past retention");
                report.removed += 1;
            }
            Err(e) => {
                warn!(archive = %path.display(), error = %e, "Failed to remove old archive");
                report.failed += 1;
                report.kept += 1;
            }
        }
    }

    debug!(
        removed = report.removed,
        kept = report.kept,
        failed = report.failed,
        "Retention pass complete"
    );
    report
}

fn is_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(archive_date)
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    const HOUR: u64 = 3600;
    const WEEK: Duration = Duration::from_secs(168 * HOUR);
    // Fixed "now" so ages are exact
    const NOW: u64 = 2_000_000_000;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(NOW)
    }

    fn archive(dir: &Path, name: &str, age_hours: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"zip").unwrap();
        let mtime = FileTime::from_unix_time((NOW - age_hours * HOUR) as i64, 0);
        set_file_mtime(&path, mtime).unwrap();
        path
    }

    #[test]
    fn test_removes_only_stale() {
        let dest = TempDir::new().unwrap();
        let old = archive(dest.path(), "Backup-2024-01-01.zip", 400);
        let older = archive(dest.path(), "Backup-2024-01-10.zip", 200);
        let fresh = archive(dest.path(), "Backup-2024-01-18.zip", 10);

        let report = prune_at(dest.path(), WEEK, now());

        assert_eq!(report, PruneReport { removed: 2, kept: 1, failed: 0 });
        assert!(!old.exists());
        assert!(!older.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_last_archive_is_kept() {
        let dest = TempDir::new().unwrap();
        let only = archive(dest.path(), "Backup-2020-01-01.zip", 9999);

        let report = prune_at(dest.path(), WEEK, now());

        assert_eq!(report.removed, 0);
        assert!(only.exists());
    }

    #[test]
    fn test_all_stale_keeps_newest() {
        let dest = TempDir::new().unwrap();
        let a = archive(dest.path(), "Backup-2020-01-01.zip", 900);
        let b = archive(dest.path(), "Backup-2020-01-05.zip", 800);
        let c = archive(dest.path(), "Backup-2020-01-09.zip", 700);

        let report = prune_at(dest.path(), WEEK, now());

        assert_eq!(report, PruneReport { removed: 2, kept: 1, failed: 0 });
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(c.exists());
    }

    #[test]
    fn test_exact_age_is_not_stale() {
        let dest = TempDir::new().unwrap();
        let boundary = archive(dest.path(), "Backup-2024-01-11.zip", 168);
        archive(dest.path(), "Backup-2024-01-18.zip", 1);

        let report = prune_at(dest.path(), WEEK, now());

        assert_eq!(report.removed, 0);
        assert!(boundary.exists());
    }

    #[test]
    fn test_foreign_files_untouched() {
        let dest = TempDir::new().unwrap();
        let notes = archive(dest.path(), "notes.txt", 5000);
        let partial = archive(dest.path(), "Backup-2024-01-01.zip.partial", 5000);
        archive(dest.path(), "Backup-2024-01-01.zip", 5000);
        archive(dest.path(), "Backup-2024-01-18.zip", 1);

        let report = prune_at(dest.path(), WEEK, now());

        assert_eq!(report.removed, 1);
        assert!(notes.exists());
        assert!(partial.exists());
    }

    #[test]
    fn test_nested_archives_and_empty_destination() {
        let dest = TempDir::new().unwrap();
        assert_eq!(prune_at(dest.path(), WEEK, now()), PruneReport::default());

        fs::create_dir(dest.path().join("2023")).unwrap();
        let nested = archive(&dest.path().join("2023"), "Backup-2023-06-01.zip", 5000);
        archive(dest.path(), "Backup-2024-01-18.zip", 1);

        let report = prune_at(dest.path(), WEEK, now());
        assert_eq!(report.removed, 1);
        assert!(!nested.exists());
    }

    #[test]
    fn test_missing_destination() {
        let report = prune(Path::new("/definitely/not/here"), WEEK);
        assert_eq!(report, PruneReport::default());
    }
}
