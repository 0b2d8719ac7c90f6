//! Pre-sync snapshot of the host library.
//!
//! Copies the whole library directory into
//! `<library-parent>/seratosync-backup/<epoch-millis>_<library-leaf>/`,
//! preserving file and directory mtimes and following no symlinks. Any
//! failure here aborts the sync — a run that cannot secure its rollback
//! point must not touch the library.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;

use crate::error::{SyncError, SyncResult};
use crate::report::SyncReporter;

/// Backup folder created next to the library.
pub const BACKUP_FOLDER: &str = "seratosync-backup";

/// Where a snapshot landed and how big it was.
#[derive(Debug)]
pub struct BackupReport {
    pub directory: PathBuf,
    pub bytes_copied: u64,
}

/// Snapshot the library directory.
///
/// # Errors
///
/// Every failure is fatal: a missing library, an uncreatable backup folder,
/// or any copy error.
pub fn create_backup(library: &Path, reporter: &dyn SyncReporter) -> SyncResult<BackupReport> {
    if !library.is_dir() {
        return Err(SyncError::LibraryMissing {
            path: library.to_owned(),
        });
    }

    let leaf = library
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let parent = library.parent().unwrap_or(library);
    let backup_dir = parent.join(BACKUP_FOLDER).join(format!("{millis}_{leaf}"));

    reporter.info(&format!("Creating backup: {}", backup_dir.display()));
    std::fs::create_dir_all(&backup_dir)?;

    let bytes_copied = copy_directory(library, &backup_dir)?;
    reporter.info(&format!("Backup complete ({})", format_bytes(bytes_copied)));

    Ok(BackupReport {
        directory: backup_dir,
        bytes_copied,
    })
}

/// Recursive copy preserving mtimes. Symlinks are skipped, not followed.
fn copy_directory(source: &Path, target: &Path) -> SyncResult<u64> {
    let mut total = 0u64;

    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let entry_path = entry.path();
        let metadata = std::fs::symlink_metadata(&entry_path)?;
        let destination = target.join(entry.file_name());

        if metadata.file_type().is_symlink() {
            tracing::debug!(link = %entry_path.display(), "skipping symlink in backup");
            continue;
        }

        if metadata.is_dir() {
            std::fs::create_dir_all(&destination)?;
            total += copy_directory(&entry_path, &destination)?;
        } else {
            total += std::fs::copy(&entry_path, &destination)?;
        }
        restore_mtime(&destination, &metadata)?;
    }

    let source_meta = std::fs::metadata(source)?;
    restore_mtime(target, &source_meta)?;
    Ok(total)
}

fn restore_mtime(target: &Path, source_meta: &std::fs::Metadata) -> SyncResult<()> {
    let mtime = FileTime::from_last_modification_time(source_meta);
    filetime::set_file_mtime(target, mtime)?;
    Ok(())
}

/// Human-readable byte count for the log line.
fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let bytes_f = bytes as f64;
    if bytes_f < KB {
        format!("{bytes} B")
    } else if bytes_f < MB {
        format!("{:.1} KB", bytes_f / KB)
    } else if bytes_f < GB {
        format!("{:.1} MB", bytes_f / MB)
    } else {
        format!("{:.2} GB", bytes_f / GB)
    }
}
