//! Zip archive creation.
//!
//! One archive per calendar day, named `Backup-YYYY-MM-DD.zip`. The archive
//! is written under a `.partial` name and renamed into place once complete,
//! so a crash never leaves something that looks like a finished backup.

use crate::fs::snapshot::WalkOptions;
use crate::utils::errors::{DaemonError, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_PREFIX: &str = "Backup-";
pub const ARCHIVE_EXTENSION: &str = ".zip";
pub const PARTIAL_SUFFIX: &str = ".partial";

/// File name of the archive for a given day
pub fn archive_name(when: NaiveDate) -> String {
    format!("{}{}{}", ARCHIVE_PREFIX, when.format("%Y-%m-%d"), ARCHIVE_EXTENSION)
}

/// Date embedded in an archive file name, if the name is one of ours
pub fn archive_date(file_name: &str) -> Option<NaiveDate> {
    let date = file_name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_EXTENSION)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Zip the whole of `source_root` into `destination_root`.
///
/// An archive for the same date is replaced. Errors reading the source or
/// writing the destination are returned; nothing is left behind on failure.
pub fn create(
    source_root: &Path,
    destination_root: &Path,
    when: NaiveDate,
    options: &WalkOptions,
) -> Result<PathBuf> {
    let source_root = source_root.canonicalize()?;
    if !source_root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", source_root.display()),
        )
        .into());
    }

    fs::create_dir_all(destination_root)?;
    let destination_root = destination_root.canonicalize()?;

    let name = archive_name(when);
    let final_path = destination_root.join(&name);
    let partial_path = destination_root.join(format!("{}{}", name, PARTIAL_SUFFIX));

    debug!(archive = %final_path.display(), "Creating backup");

    let written = File::create(&partial_path)
        .map_err(DaemonError::from)
        .and_then(|file| write_zip(file, &source_root, &destination_root, options));

    let files = match written {
        Ok(files) => files,
        Err(e) => {
            let _ = fs::remove_file(&partial_path);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&partial_path, &final_path) {
        let _ = fs::remove_file(&partial_path);
        return Err(e.into());
    }

    info!(archive = %final_path.display(), files, "Backup created");
    Ok(final_path)
}

/// Stream every file under `source_root` into a zip. Returns the file count.
fn write_zip(
    file: File,
    source_root: &Path,
    skip: &Path,
    options: &WalkOptions,
) -> Result<usize> {
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let base = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0usize;

    for entry in options.walker(source_root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(&e) => {
                warn!(error = %e, "Entry disappeared while archiving");
                continue;
            }
            Err(e) => return Err(io::Error::from(e).into()),
        };

        if entry.depth() == 0 || entry.path().starts_with(skip) {
            continue;
        }

        let metadata = match fs::metadata(entry.path()) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Broken symlink or removed since listing
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let name = entry_name(source_root, entry.path());
        let entry_options = with_metadata(base, &metadata);

        if entry.file_type().is_dir() {
            writer.add_directory(name, entry_options)?;
        } else if metadata.is_file() {
            let mut src = match File::open(entry.path()) {
                Ok(src) => src,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            writer.start_file(name, entry_options.large_file(metadata.len() >= u32::MAX as u64))?;
            io::copy(&mut src, &mut writer)?;
            files += 1;
        }
    }

    let mut out = writer.finish()?;
    io::Write::flush(&mut out)?;
    out.get_ref().sync_all()?;
    Ok(files)
}

/// Archive-relative name with `/` separators
fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn with_metadata(options: FileOptions, metadata: &fs::Metadata) -> FileOptions {
    let mut options = options;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
    }

    if let Some(time) = metadata.modified().ok().and_then(zip_time) {
        options = options.last_modified_time(time);
    }

    options
}

/// Zip timestamps are local time, 1980..=2107; anything else keeps the default
fn zip_time(time: SystemTime) -> Option<zip::DateTime> {
    let local: DateTime<Local> = time.into();
    let year = u16::try_from(local.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn is_vanished(e: &walkdir::Error) -> bool {
    e.io_error()
        .map(|io| io.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}
