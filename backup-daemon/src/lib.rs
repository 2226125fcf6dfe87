//! Backup Daemon Library
//!
//! Polls a folder, zips it into a dated archive whenever its contents change,
//! and prunes archives past their retention window.

pub mod archive;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod fingerprint;
pub mod fs;
pub mod ingest;
pub mod retention;
pub mod utils;

// Re-export commonly used types
pub use config::{Settings, SettingsStore};
pub use controller::{BackupController, CycleOutcome};
pub use utils::errors::DaemonError;
pub type Result<T> = std::result::Result<T, DaemonError>;
