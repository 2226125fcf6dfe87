//! The poll loop.
//!
//! Each cycle walks the source folder, compares the fingerprint with the one
//! saved at the last backup, and on a difference writes a new archive,
//! persists the new fingerprint and prunes old archives. Then it sleeps.

use crate::archive;
use crate::config::SettingsStore;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::fs::snapshot::{snapshot, WalkOptions};
use crate::retention::{self, PruneReport};
use crate::utils::errors::Result;
use chrono::{Local, NaiveDate};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Where the controller is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Snapshotting,
    Comparing,
    BackingUp,
    Pruning,
    Sleeping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Snapshotting => "snapshotting",
            Phase::Comparing => "comparing",
            Phase::BackingUp => "backing_up",
            Phase::Pruning => "pruning",
            Phase::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Source folder does not exist; nothing was done
    SourceMissing,
    /// Fingerprint equals the saved one
    Unchanged(Fingerprint),
    /// A new archive was written and the fingerprint saved
    BackedUp {
        archive: PathBuf,
        fingerprint: Fingerprint,
        pruned: PruneReport,
    },
    /// Archive creation failed; the saved fingerprint was not touched
    BackupFailed(String),
}

/// Runs poll cycles against the settings it owns
pub struct BackupController {
    store: Arc<SettingsStore>,
}

impl BackupController {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// Errors and panics inside a cycle are logged and the loop carries on.
    /// Cancellation interrupts the sleep; a running cycle is allowed to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Backup controller started");

        loop {
            match self.run_cycle().await {
                Ok(outcome) => debug!(?outcome, "Cycle finished"),
                Err(e) => error!(error = %e, "Backup cycle failed"),
            }

            let interval = self.store.snapshot().poll_interval();
            enter(Phase::Sleeping);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => break,
            }

            enter(Phase::Idle);
        }

        info!("Backup controller stopped");
    }

    /// One cycle dated today
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.run_cycle_on(Local::now().date_naive()).await
    }

    /// One cycle, naming any archive after `today`.
    ///
    /// File system work runs on the blocking pool; a panic there comes back
    /// as an error instead of taking the loop down.
    pub async fn run_cycle_on(&self, today: NaiveDate) -> Result<CycleOutcome> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || cycle(&store, today)).await?
    }
}

fn enter(phase: Phase) {
    debug!(%phase, "Phase");
}

fn cycle(store: &SettingsStore, today: NaiveDate) -> Result<CycleOutcome> {
    let settings = store.snapshot();
    let options = WalkOptions::with_excludes(&settings.exclude_patterns);

    enter(Phase::Snapshotting);
    if !settings.folder_from.is_dir() {
        error!(folder = %settings.folder_from.display(), "Source folder not found");
        return Ok(CycleOutcome::SourceMissing);
    }
    let snap = snapshot(&settings.folder_from, &options);

    enter(Phase::Comparing);
    let current = fingerprint(&snap);
    debug!(current = %current, saved = %settings.saved, files = snap.len(), "Comparing fingerprints");
    if current.matches(&settings.saved) {
        return Ok(CycleOutcome::Unchanged(current));
    }

    enter(Phase::BackingUp);
    let archive = match archive::create(&settings.folder_from, &settings.folder_to, today, &options) {
        Ok(path) => path,
        Err(e) => {
            error!(
                source = %settings.folder_from.display(),
                destination = %settings.folder_to.display(),
                error = %e,
                "Backup failed, will retry next cycle"
            );
            return Ok(CycleOutcome::BackupFailed(e.to_string()));
        }
    };

    // Must be durable before anything else happens
    store.update(|s| s.saved = current.to_string())?;

    enter(Phase::Pruning);
    let pruned = retention::prune(&settings.folder_to, settings.retention());

    Ok(CycleOutcome::BackedUp {
        archive,
        fingerprint: current,
        pruned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        source: PathBuf,
        dest: PathBuf,
        controller: BackupController,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("from");
        let dest = dir.path().join("to");
        fs::create_dir(&source).unwrap();

        let settings = Settings {
            folder_from: source.clone(),
            folder_to: dest.clone(),
            ..Settings::default()
        };
        let store = SettingsStore::new(dir.path().join("settings.cfg"), settings);

        Fixture {
            _dir: dir,
            source,
            dest,
            controller: BackupController::new(Arc::new(store)),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn write_at(path: &Path, secs: i64) {
        fs::write(path, path.to_string_lossy().as_bytes()).unwrap();
        set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    fn archive_count(dest: &Path) -> usize {
        fs::read_dir(dest).map(|rd| rd.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_change_detection_scenario() {
        let fx = fixture();
        write_at(&fx.source.join("a.txt"), 100);
        write_at(&fx.source.join("b.txt"), 100);

        // First cycle backs up
        let first = fx.controller.run_cycle_on(day(1)).await.unwrap();
        let f1 = match first {
            CycleOutcome::BackedUp { fingerprint, archive, .. } => {
                assert!(archive.ends_with("Backup-2024-05-01.zip"));
                fingerprint
            }
            other => panic!("expected backup, got {:?}", other),
        };
        assert_eq!(fx.controller.store().snapshot().saved, f1.to_string());
        assert_eq!(archive_count(&fx.dest), 1);

        // Identical tree: nothing new
        let second = fx.controller.run_cycle_on(day(2)).await.unwrap();
        assert_eq!(second, CycleOutcome::Unchanged(f1));
        assert_eq!(archive_count(&fx.dest), 1);

        // Touch b.txt
        set_file_mtime(fx.source.join("b.txt"), FileTime::from_unix_time(200, 0)).unwrap();
        let third = fx.controller.run_cycle_on(day(3)).await.unwrap();
        let f2 = match third {
            CycleOutcome::BackedUp { fingerprint, .. } => fingerprint,
            other => panic!("expected backup, got {:?}", other),
        };
        assert_ne!(f1, f2);
        assert_eq!(fx.controller.store().snapshot().saved, f2.to_string());
        assert_eq!(archive_count(&fx.dest), 2);

        // Persisted, not just in memory
        let (persisted, _) = Settings::load(fx.controller.store().path()).unwrap();
        assert_eq!(persisted.saved, f2.to_string());
    }

    #[tokio::test]
    async fn test_missing_source_skips_cycle() {
        let fx = fixture();
        fs::remove_dir(&fx.source).unwrap();

        let outcome = fx.controller.run_cycle_on(day(1)).await.unwrap();

        assert_eq!(outcome, CycleOutcome::SourceMissing);
        assert_eq!(fx.controller.store().snapshot().saved, "");
        assert!(!fx.dest.exists());
    }

    #[tokio::test]
    async fn test_failed_archive_keeps_fingerprint() {
        let fx = fixture();
        write_at(&fx.source.join("a.txt"), 100);
        // A file where the destination folder should be
        fs::write(&fx.dest, b"").unwrap();

        let outcome = fx.controller.run_cycle_on(day(1)).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::BackupFailed(_)));
        assert_eq!(fx.controller.store().snapshot().saved, "");

        // Next cycle retries the same change
        fs::remove_file(&fx.dest).unwrap();
        let retry = fx.controller.run_cycle_on(day(1)).await.unwrap();
        assert!(matches!(retry, CycleOutcome::BackedUp { .. }));
        assert_eq!(archive_count(&fx.dest), 1);
    }

    #[tokio::test]
    async fn test_persist_failure_fails_cycle() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("from");
        fs::create_dir(&source).unwrap();
        write_at(&source.join("a.txt"), 100);

        let settings = Settings {
            folder_from: source,
            folder_to: dir.path().join("to"),
            ..Settings::default()
        };
        let store = SettingsStore::new(dir.path().join("no-such-dir/settings.cfg"), settings);
        let controller = BackupController::new(Arc::new(store));

        assert!(controller.run_cycle_on(day(1)).await.is_err());
        assert_eq!(controller.store().snapshot().saved, "");
    }

    #[tokio::test]
    async fn test_prunes_after_backup() {
        let fx = fixture();
        write_at(&fx.source.join("a.txt"), 100);
        fs::create_dir(&fx.dest).unwrap();
        let stale = fx.dest.join("Backup-2000-01-01.zip");
        write_at(&stale, 946_684_800);

        let outcome = fx.controller.run_cycle_on(day(1)).await.unwrap();

        match outcome {
            CycleOutcome::BackedUp { pruned, .. } => assert_eq!(pruned.removed, 1),
            other => panic!("expected backup, got {:?}", other),
        }
        assert!(!stale.exists());
        assert_eq!(archive_count(&fx.dest), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fx = fixture();
        fx.controller
            .store()
            .update(|s| s.sleep_time = 3600)
            .unwrap();
        let controller = Arc::new(fx.controller);
        let token = CancellationToken::new();

        let handle = {
            let controller = Arc::clone(&controller);
            let token = token.clone();
            tokio::spawn(async move { controller.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("controller should stop promptly")
            .unwrap();

        // The first cycle ran before the sleep
        assert_eq!(archive_count(&fx.dest), 1);
    }
}
