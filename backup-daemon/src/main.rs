//! Backup Daemon - Main entry point
//!
//! Watches a folder and zips it into the destination whenever it changes.

use anyhow::Result;
use backup_daemon::config::{Settings, SettingsStore, DEFAULT_SETTINGS_PATH};
use backup_daemon::daemon::ShutdownCoordinator;
use backup_daemon::utils::logger::{self, LogDestination};
use backup_daemon::{BackupController, DaemonError};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to settings file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the settings file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run mode: SERVICE logs to the configured log folder, anything else to the console
    mode: Option<String>,
}

impl Args {
    fn service_mode(&self) -> bool {
        self.mode
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("service"))
            .unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let service_mode = args.service_mode();

    // Peek at the settings for logging; the store re-reads and migrates them
    let settings = match Settings::load(&args.config) {
        Ok((settings, _)) => Some(settings),
        Err(DaemonError::SettingsNotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    let defaults = Settings::default();
    let log_settings = settings.as_ref().unwrap_or(&defaults);
    let destination = if service_mode {
        LogDestination::File(log_settings.log_folder.clone())
    } else {
        LogDestination::Console
    };
    let log_level = args.log_level.as_deref().unwrap_or(&log_settings.log_level);
    logger::init(log_level, &destination)?;

    tracing::info!(
        "Starting backup-daemon v{} in {} mode",
        env!("CARGO_PKG_VERSION"),
        if service_mode { "service" } else { "console" }
    );

    if settings.is_none() {
        tracing::error!("Settings file not found: {}", args.config.display());
        Settings::write_template(&args.config)?;
        tracing::info!(
            "Default settings written to {}, edit it and restart",
            args.config.display()
        );
        return Ok(ExitCode::FAILURE);
    }

    let store = SettingsStore::open(&args.config)?;
    tracing::debug!("Settings loaded from {}", store.path().display());

    let controller = BackupController::new(Arc::new(store));

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();
    let token = shutdown_coordinator.token();

    let controller_handle = tokio::spawn(async move {
        controller.run(token).await;
    });

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    // Let the current cycle finish writing before exiting
    match controller_handle.await {
        Ok(()) => tracing::info!("Backup daemon stopped"),
        Err(e) => tracing::error!("Controller task panicked: {}", e),
    }

    Ok(ExitCode::SUCCESS)
}
