//! Custom error types for the backup daemon.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings file not found: {}", .0.display())]
    SettingsNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid folder name: {0}")]
    InvalidFolder(String),

    #[error("Ownership error: {0}")]
    Ownership(String),

    #[error("Task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for DaemonError {
    fn from(e: tokio::task::JoinError) -> Self {
        DaemonError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
