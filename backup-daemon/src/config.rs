//! Persisted settings for the backup daemon.
//!
//! Settings live in a JSON file that doubles as the daemon's durable state
//! (the last seen fingerprint is stored alongside the folders to watch).
//! Older files without a `schema_version` are migrated once at load time.

use crate::utils::errors::{DaemonError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// Current settings schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Default settings file, relative to the working directory
pub const DEFAULT_SETTINGS_PATH: &str = "settings.cfg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version of the file (0 = written before versioning existed)
    #[serde(default)]
    pub schema_version: u32,

    /// Fingerprint of the source tree at the last successful backup
    #[serde(default)]
    pub saved: String,

    /// Folder being watched and archived
    pub folder_from: PathBuf,

    /// Folder receiving the archives
    pub folder_to: PathBuf,

    /// Sender id -> subfolder of `folder_from`
    #[serde(default)]
    pub folders_for_admins: BTreeMap<String, String>,

    /// Poll interval in seconds
    #[serde(default = "default_sleep_time")]
    pub sleep_time: u64,

    /// Folder for the log file in service mode
    #[serde(default = "default_log_folder")]
    pub log_folder: PathBuf,

    /// Log level (DEBUG, INFO, WARNING, ERROR)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Archive retention in hours
    #[serde(default = "default_file_retention_time")]
    pub file_retention_time: u64,

    /// Owner applied to files received from admins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_to_own: Option<String>,

    /// Group applied to files received from admins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_to_own: Option<String>,

    /// File-name substrings skipped by snapshots and archives
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
}

// Default values
fn default_sleep_time() -> u64 {
    20
}

fn default_log_folder() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_file_retention_time() -> u64 {
    24 * 365 // one year
}

impl Default for Settings {
    /// The template written for the operator when no settings file exists
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            saved: String::new(),
            folder_from: PathBuf::from("FOLDER/FOR/UNZIPPED/FILES"),
            folder_to: PathBuf::from("FOLDER/FOR/ZIP/SAVES"),
            folders_for_admins: BTreeMap::new(),
            sleep_time: default_sleep_time(),
            log_folder: default_log_folder(),
            log_level: default_log_level(),
            file_retention_time: default_file_retention_time(),
            user_to_own: None,
            group_to_own: None,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Settings {
    /// Interval between two polls of the source folder
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_time)
    }

    /// Maximum archive age before it becomes eligible for pruning
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.file_retention_time.saturating_mul(3600))
    }

    /// Subfolder registered for an admin, if any
    pub fn admin_folder(&self, sender: &str) -> Option<&str> {
        self.folders_for_admins.get(sender).map(String::as_str)
    }

    /// Reject settings the daemon cannot run with and warn about odd ones
    pub fn validate(&self) -> Result<()> {
        if self.sleep_time == 0 {
            return Err(DaemonError::Config("sleep_time must be greater than zero".into()));
        }
        if self.folder_from.as_os_str().is_empty() || self.folder_to.as_os_str().is_empty() {
            return Err(DaemonError::Config("folder_from and folder_to must be set".into()));
        }
        if self.folder_to.starts_with(&self.folder_from) {
            warn!(
                folder_from = %self.folder_from.display(),
                folder_to = %self.folder_to.display(),
                "Destination is inside the source folder; every backup will look like a change"
            );
        }
        Ok(())
    }

    /// Parse settings from raw JSON, upgrading old schemas.
    ///
    /// Returns the settings and whether a migration happened.
    pub fn from_json(content: &str) -> Result<(Self, bool)> {
        let raw: Value = serde_json::from_str(content)?;
        let Value::Object(mut map) = raw else {
            return Err(DaemonError::Config("settings must be a JSON object".into()));
        };

        let version = match map.get("schema_version") {
            None | Some(Value::Null) => 0,
            Some(raw) => raw
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| DaemonError::Config(format!("invalid schema_version: {}", raw)))?,
        };
        if version > SCHEMA_VERSION {
            return Err(DaemonError::Config(format!(
                "settings schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        if version < 1 {
            migrate_v0(&mut map);
        }

        let mut settings: Settings = serde_json::from_value(Value::Object(map))?;
        settings.schema_version = SCHEMA_VERSION;
        Ok((settings, version < SCHEMA_VERSION))
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<(Self, bool)> {
        if !path.exists() {
            return Err(DaemonError::SettingsNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write settings durably: temp file, fsync, rename over the target
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Write the default template so the operator has something to edit
    pub fn write_template(path: &Path) -> Result<Self> {
        let settings = Settings::default();
        settings.save(path)?;
        info!(path = %path.display(), "Default settings file created");
        Ok(settings)
    }
}

/// v0 files predate retention: they keep archives for a year
fn migrate_v0(map: &mut Map<String, Value>) {
    map.entry("file_retention_time")
        .or_insert_with(|| Value::from(default_file_retention_time()));
}

/// Single owner of the settings and of the file they persist to.
///
/// Every mutation goes through [`SettingsStore::update`], which holds the
/// lock across the file write so two writers can never interleave.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<Settings>,
}

impl SettingsStore {
    /// Wrap already-loaded settings
    pub fn new(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            path: path.into(),
            current: Mutex::new(settings),
        }
    }

    /// Load, migrate and validate settings from `path`.
    ///
    /// A migrated file is written back immediately.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (settings, migrated) = Settings::load(&path)?;
        settings.validate()?;

        if migrated {
            settings.save(&path)?;
            info!(
                path = %path.display(),
                version = SCHEMA_VERSION,
                "Settings file migrated"
            );
        }

        Ok(Self::new(path, settings))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    /// Apply `mutate`, persist the result, then commit it in memory.
    ///
    /// If the write fails the in-memory settings are left untouched.
    pub fn update<F, T>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Settings) -> T,
    {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = mutate(&mut next);
        next.save(&self.path)?;
        *guard = next;
        Ok(out)
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
