//! Detects duplicate media files and moves the non-kept copies into a
//! timestamped quarantine folder next to the music library.
//!
//! Files are grouped by fingerprint — the NFC-lowercased leaf filename,
//! optionally joined with the byte size — and within each group of two or
//! more the policy decides which copy survives: `keep-newest` keeps the
//! maximum mtime, `keep-oldest` the minimum. Everything else is moved into
//! `<music-root-parent>/seratosync/dupes/<timestamp>/<relative-path>`, so
//! the original folder structure is recoverable. A `dupes.log` report sits
//! at the quarantine root.
//!
//! Individual move failures are logged and do not abort the pass; the
//! returned moved→kept map feeds the index repair so history references
//! survive the move.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use seratosync_format::path;

use crate::config::{DupeDetection, DupeMovePolicy};
use crate::error::SyncResult;
use crate::report::SyncReporter;
use crate::scanner::MediaNode;

/// Quarantine folder, created next to the music library root.
pub const QUARANTINE_FOLDER: &str = "seratosync/dupes";

/// Outcome of one scan-and-move pass.
#[derive(Debug, Default)]
pub struct DupeMoveReport {
    /// Moved absolute path → kept absolute path.
    pub moved_to_kept: BTreeMap<String, String>,
    pub groups_found: usize,
    pub files_moved: usize,
    /// The timestamped quarantine directory, when anything was moved.
    pub quarantine: Option<PathBuf>,
}

/// Group the media tree by fingerprint and move the non-kept duplicates.
///
/// # Errors
///
/// Only quarantine-creation failures are fatal; per-file move errors are
/// logged and skipped.
pub fn scan_and_move(
    music_root: &Path,
    media: &MediaNode,
    detection: DupeDetection,
    policy: DupeMovePolicy,
    reporter: &dyn SyncReporter,
) -> SyncResult<DupeMoveReport> {
    let mut report = DupeMoveReport::default();
    if detection == DupeDetection::Off || policy == DupeMovePolicy::Off {
        reporter.info("Duplicate detection is disabled");
        return Ok(report);
    }

    reporter.info("Scanning for duplicates to move...");
    reporter.info(match policy {
        DupeMovePolicy::KeepNewest => "Move strategy: keep newest, move older files",
        DupeMovePolicy::KeepOldest => "Move strategy: keep oldest, move newer files",
        DupeMovePolicy::Off => unreachable!("checked above"),
    });

    let groups = duplicate_groups(media, detection);
    if groups.is_empty() {
        reporter.info("No duplicates found");
        return Ok(report);
    }
    report.groups_found = groups.len();
    reporter.info(&format!("Found {} duplicate groups", groups.len()));

    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let parent = music_root.parent().unwrap_or(music_root);
    let quarantine = parent.join(QUARANTINE_FOLDER).join(&timestamp);
    std::fs::create_dir_all(&quarantine)?;

    let mut log_entries: Vec<String> = Vec::new();
    for (fingerprint, mut paths) in groups {
        sort_by_policy(&mut paths, policy);
        let kept = paths[0].clone();

        log_entries.push(format!("Duplicate group: {fingerprint}"));
        log_entries.push(format!("  KEPT:  {kept}"));

        for moved in &paths[1..] {
            let relative = relative_to_root(moved, music_root);
            let destination = quarantine.join(&relative);
            match move_file(Path::new(moved), &destination) {
                Ok(()) => {
                    log_entries.push(format!("  MOVED: {moved}"));
                    log_entries.push(format!("      -> {}", destination.display()));
                    report.moved_to_kept.insert(moved.clone(), kept.clone());
                    report.files_moved += 1;
                }
                Err(err) => {
                    log_entries.push(format!("  ERROR: failed to move {moved}: {err}"));
                    reporter.error(&format!("Failed to move duplicate {moved}: {err}"));
                }
            }
        }
        log_entries.push(String::new());
    }

    write_move_log(&quarantine, &timestamp, &report, &log_entries);
    reporter.info(&format!(
        "Moved {} duplicate files to {}",
        report.files_moved,
        quarantine.display()
    ));
    report.quarantine = Some(quarantine);
    Ok(report)
}

/// Log duplicate groups without moving anything. Returns the group count.
pub fn log_duplicate_groups(media: &MediaNode, reporter: &dyn SyncReporter) -> usize {
    reporter.info("Scanning for duplicate files...");
    let groups = duplicate_groups(media, DupeDetection::NameAndSize);
    for (fingerprint, paths) in &groups {
        reporter.info(&format!("Duplicate group: {fingerprint}"));
        for path in paths {
            reporter.info(&format!("  {path}"));
        }
    }
    if groups.is_empty() {
        reporter.info("No duplicates found on the drive");
    } else {
        reporter.info(&format!("Found {} duplicate file groups", groups.len()));
    }
    groups.len()
}

/// Fingerprint → paths, for every fingerprint carried by two or more files.
fn duplicate_groups(
    media: &MediaNode,
    detection: DupeDetection,
) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for track in media.flattened_tracks() {
        let key = match detection {
            DupeDetection::NameOnly => path::nfc_lower_filename(&track),
            _ => {
                let size = std::fs::metadata(&track).map(|m| m.len()).unwrap_or(0);
                format!("{}|{size}", path::nfc_lower_filename(&track))
            }
        };
        groups.entry(key).or_default().push(track);
    }
    groups.retain(|_, paths| paths.len() >= 2);
    groups
}

fn mtime_of(file: &str) -> SystemTime {
    std::fs::metadata(file)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Order so the kept file is first: newest-first for keep-newest,
/// oldest-first for keep-oldest. Ties break on the path for determinism.
fn sort_by_policy(paths: &mut [String], policy: DupeMovePolicy) {
    paths.sort_by(|a, b| {
        let (ta, tb) = (mtime_of(a), mtime_of(b));
        let by_time = match policy {
            DupeMovePolicy::KeepOldest => ta.cmp(&tb),
            _ => tb.cmp(&ta),
        };
        by_time.then_with(|| a.cmp(b))
    });
}

/// Path of `file` relative to the music root; falls back to the leaf when
/// the file sits outside the root.
fn relative_to_root(file: &str, music_root: &Path) -> PathBuf {
    let root = music_root.to_string_lossy().replace('\\', "/");
    let root = if root.ends_with('/') { root } else { format!("{root}/") };
    let file_slashed = file.replace('\\', "/");
    match file_slashed.strip_prefix(&root) {
        Some(relative) => PathBuf::from(relative),
        None => PathBuf::from(path::filename(file)),
    }
}

/// Atomic rename where possible, copy-then-delete across devices.
fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(source, destination)?;
            std::fs::remove_file(source)
        }
    }
}

fn write_move_log(
    quarantine: &Path,
    timestamp: &str,
    report: &DupeMoveReport,
    entries: &[String],
) {
    let mut content = String::new();
    content.push_str("=== Duplicate File Scan Report ===\n");
    content.push_str(&format!("Date: {}\n", timestamp.replace('_', " ")));
    content.push_str(&format!(
        "Total duplicate groups found: {}\n",
        report.groups_found
    ));
    content.push_str(&format!("Total files moved: {}\n", report.files_moved));
    content.push_str("=====================================\n\n");
    for entry in entries {
        content.push_str(entry);
        content.push('\n');
    }
    if let Err(err) = std::fs::write(quarantine.join("dupes.log"), content) {
        tracing::warn!(error = %err, "failed to write dupes.log");
    }
}
