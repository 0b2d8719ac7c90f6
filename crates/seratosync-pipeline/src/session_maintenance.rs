//! Maintenance passes over the session history.
//!
//! Two operations, both driven from the orchestrator or run standalone:
//!
//! - [`fix_broken_paths`] rebinds session entries whose files moved,
//!   resolving through one or more scanned media trees (first tree wins on
//!   a filename collision) and through the library index. The index is
//!   updated first so a session never points at a path the index does not
//!   know, then the session files are rewritten in parallel.
//! - [`delete_short_sessions`] removes `.session` files whose recorded
//!   span is under a threshold and scrubs their entries from
//!   `history.database`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use seratosync_format::{index_repair, path, session, LibraryIndex, PathFix, SessionFile};

use crate::error::SyncResult;
use crate::report::SyncReporter;
use crate::scanner::MediaNode;

/// Counters from a session path-fix pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionFixReport {
    /// Distinct broken paths discovered across all sessions.
    pub broken_paths: usize,
    /// Broken paths a replacement was found for.
    pub fixable: usize,
    /// Broken paths left untouched.
    pub unfixable: usize,
    /// `pfil` payloads rewritten in the index.
    pub index_paths_fixed: usize,
    /// Session files rewritten.
    pub sessions_rewritten: usize,
    /// Entries rewritten across those files.
    pub entries_rewritten: usize,
}

/// Rebind broken paths in every session under `<library>/History/Sessions`.
///
/// # Errors
///
/// Only index-repair I/O failures propagate. Unreadable sessions are
/// skipped; per-file write failures are logged and counted out.
pub fn fix_broken_paths(
    library: &Path,
    media_trees: &[&MediaNode],
    index: Option<&LibraryIndex>,
    reporter: &dyn SyncReporter,
) -> SyncResult<SessionFixReport> {
    reporter.info("Checking for broken filepaths in session files...");

    // Filename → current location. Trees are merged in reverse so the
    // first tree wins when the same filename exists in several.
    let mut media_by_leaf: HashMap<String, String> = HashMap::new();
    let mut total_tracks = 0usize;
    for media in media_trees.iter().rev() {
        let tracks = media.flattened_tracks();
        total_tracks += tracks.len();
        for track in tracks {
            media_by_leaf.insert(path::nfc_lower_filename(&track), track);
        }
    }
    reporter.info(&format!(
        "Loaded {total_tracks} tracks from {} media trees for lookup",
        media_trees.len()
    ));

    let mut report = SessionFixReport::default();
    let session_files = session_files_in(library);
    if session_files.is_empty() {
        reporter.info("No session files found");
        return Ok(report);
    }
    reporter.info(&format!(
        "Found {} session files to scan",
        session_files.len()
    ));

    // First pass: collect fixes across all sessions.
    let mut fixes: BTreeMap<String, String> = BTreeMap::new();
    let mut unfixable: HashSet<String> = HashSet::new();
    let mut already_checked: HashSet<String> = HashSet::new();

    for file in &session_files {
        let session = match SessionFile::read_from(file) {
            Ok(session) => session,
            Err(err) => {
                reporter.error(&format!("Failed to read session {}: {err}", file.display()));
                continue;
            }
        };

        for track_path in session.unique_paths() {
            if !already_checked.insert(track_path.clone()) {
                continue;
            }
            if Path::new(&track_path).exists() {
                continue;
            }
            report.broken_paths += 1;

            let leaf = path::nfc_lower_filename(&track_path);
            let relocated = media_by_leaf
                .get(&leaf)
                .filter(|found| Path::new(found).exists());
            let Some(found) = relocated else {
                unfixable.insert(track_path);
                continue;
            };

            // Prefer the index's own surviving path; when the index itself
            // is stale, queue it for repair as well.
            let mut replacement = found.clone();
            if let Some(index) = index {
                if let Some(stored) = index.original_path_by_filename(found) {
                    if Path::new(stored).exists() {
                        replacement = stored.to_owned();
                    } else {
                        fixes.insert(stored.to_owned(), found.clone());
                    }
                }
            }
            fixes.insert(track_path.clone(), replacement.clone());
            reporter.info(&format!("Found fix: {track_path} -> {replacement}"));
        }
    }

    if !unfixable.is_empty() {
        reporter.info(&format!(
            "Leaving {} broken paths unchanged (not found in any media tree):",
            unfixable.len()
        ));
        let mut sorted: Vec<_> = unfixable.iter().collect();
        sorted.sort();
        for track_path in sorted {
            reporter.info(&format!("  - {track_path}"));
        }
    }
    report.fixable = fixes.len();
    report.unfixable = unfixable.len();
    reporter.info(&format!(
        "Broken paths found: {} ({} fixable, {} unfixable)",
        report.broken_paths, report.fixable, report.unfixable
    ));

    if fixes.is_empty() {
        return Ok(report);
    }

    // Index first, sessions second.
    let path_fixes: Vec<PathFix> = fixes
        .iter()
        .map(|(old, new)| PathFix::from_paths(old, new))
        .collect();
    report.index_paths_fixed =
        index_repair::repair_index_file(&library.join("database V2"), &path_fixes)?;
    if report.index_paths_fixed > 0 {
        reporter.info(&format!(
            "Updated {} paths in the library index",
            report.index_paths_fixed
        ));
    }

    // Second pass: rewrite sessions in parallel.
    let sessions_rewritten = AtomicUsize::new(0);
    let entries_rewritten = AtomicUsize::new(0);
    let processed = AtomicUsize::new(0);
    let total = session_files.len();

    session_files.par_iter().for_each(|file| {
        let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.progress("Updating session files", done, total);

        let Ok(mut session) = SessionFile::read_from(file) else {
            return;
        };
        let mut fixed_entries = 0;
        for (old, new) in &fixes {
            fixed_entries += session.update_path(old, new);
        }
        if fixed_entries == 0 {
            return;
        }
        match session.write_to(file) {
            Ok(()) => {
                sessions_rewritten.fetch_add(1, Ordering::Relaxed);
                entries_rewritten.fetch_add(fixed_entries, Ordering::Relaxed);
            }
            Err(err) => {
                reporter.error(&format!(
                    "Failed to write session {}: {err}",
                    file.display()
                ));
            }
        }
    });
    reporter.progress_complete("Updating session files");

    report.sessions_rewritten = sessions_rewritten.load(Ordering::Relaxed);
    report.entries_rewritten = entries_rewritten.load(Ordering::Relaxed);
    if report.sessions_rewritten > 0 {
        reporter.info(&format!(
            "Fixed {} path entries across {} session files",
            report.entries_rewritten, report.sessions_rewritten
        ));
    }
    Ok(report)
}

/// Delete sessions shorter than `min_minutes` and scrub their entries from
/// the history catalog. Returns the number of session files deleted.
///
/// # Errors
///
/// Propagates catalog read/write failures; individual unparseable sessions
/// are skipped.
pub fn delete_short_sessions(
    library: &Path,
    min_minutes: u32,
    reporter: &dyn SyncReporter,
) -> SyncResult<usize> {
    if min_minutes == 0 {
        return Ok(0);
    }
    reporter.info(&format!(
        "Deleting sessions shorter than {min_minutes} minutes..."
    ));

    let min_seconds = min_minutes * 60;
    let mut deleted = 0usize;

    for file in session_files_in(library) {
        let Ok(session) = SessionFile::read_from(&file) else {
            continue;
        };
        let duration = session.duration_seconds();
        if duration > 0 && duration < min_seconds {
            match std::fs::remove_file(&file) {
                Ok(()) => {
                    deleted += 1;
                    let name = file
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    reporter.info(&format!("  Deleted: {name} ({} min)", duration / 60));
                }
                Err(err) => {
                    reporter.error(&format!("Failed to delete {}: {err}", file.display()));
                }
            }
        }
    }

    if deleted == 0 {
        reporter.info(&format!("No sessions under {min_minutes} minutes found"));
        return Ok(0);
    }
    reporter.info(&format!("Deleted {deleted} short session files"));

    let catalog = library.join("History/history.database");
    if catalog.exists() {
        let data = std::fs::read(&catalog)?;
        let outcome = session::scrub_history_database(&data, min_seconds);
        std::fs::write(&catalog, outcome.data)?;
        reporter.info(&format!(
            "Removed {} entries from history.database",
            outcome.removed
        ));
    }
    Ok(deleted)
}

fn session_files_in(library: &Path) -> Vec<PathBuf> {
    let sessions_dir = library.join("History/Sessions");
    let Ok(entries) = std::fs::read_dir(&sessions_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "session"))
        .collect();
    files.sort();
    files
}
