//! Logging configuration using tracing.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Name of the log file written in service mode
pub const LOG_FILE_NAME: &str = "backup-daemon.log";

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Interactive run: coloured output on stdout
    Console,
    /// Service run: plain lines appended to `<folder>/backup-daemon.log`
    File(PathBuf),
}

/// Map the level names used in the settings file onto tracing levels.
///
/// Accepts the upper-case spellings operators are used to (`WARNING`,
/// `CRITICAL`) as well as plain tracing names. Unknown names fall back to `info`.
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => "info",
    }
}

/// Initialize logging with the specified level and destination
pub fn init(level: &str, destination: &LogDestination) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(normalize_level(level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match destination {
        LogDestination::Console => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
        LogDestination::File(folder) => {
            std::fs::create_dir_all(folder)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(folder.join(LOG_FILE_NAME))?;

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("DEBUG"), "debug");
        assert_eq!(normalize_level("INFO"), "info");
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("CRITICAL"), "error");
        assert_eq!(normalize_level(" error "), "error");
        assert_eq!(normalize_level("verbose"), "info");
    }
}
