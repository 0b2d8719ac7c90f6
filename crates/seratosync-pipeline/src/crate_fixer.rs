//! Rebinds broken track references in the existing crates.
//!
//! Runs after the main smart-write pass. Every crate in `Subcrates` is
//! scanned in parallel; for each track one of three things happens:
//!
//! - the file exists (directly, or after prepending the volume root to a
//!   relative path): the canonical form is kept, and when the index carries
//!   a different path for the same filename a fix is queued so the index
//!   follows the crate;
//! - the file is gone but a file with the same NFC-lowercased leaf exists
//!   in the scanned media tree: the track is rebound to that directory,
//!   keeping the filename bytes the index has on record;
//! - nothing matches: the broken path is left untouched.
//!
//! Fixes accumulate keyed by old path (ordered, so application order is
//! deterministic), the index is repaired first, and only then are the dirty
//! crates rewritten — a crate pointing at a path the index does not know
//! yet would make the host duplicate the track.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use seratosync_format::{index_repair, path, CrateFile, LibraryIndex, PathFix};

use crate::error::SyncResult;
use crate::report::SyncReporter;
use crate::scanner::MediaNode;

/// Counters from one fixer run.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixReport {
    /// `pfil` payloads rewritten in the index.
    pub index_paths_fixed: usize,
    /// Crate files rewritten with corrected tracks.
    pub crates_rewritten: usize,
    /// Tracks carried by the rewritten crates.
    pub tracks_rewritten: usize,
}

struct CrateOutcome {
    file: PathBuf,
    new_tracks: Vec<String>,
    changed: bool,
    fixes: Vec<(String, String)>,
}

/// Scan every crate under the library, repair the index, rewrite dirty
/// crates.
///
/// # Errors
///
/// Only index-repair I/O failures propagate; unreadable crates and failed
/// crate writes are logged and skipped per item.
pub fn fix_broken_paths(
    library: &Path,
    media: &MediaNode,
    index: Option<&LibraryIndex>,
    reporter: &dyn SyncReporter,
) -> SyncResult<FixReport> {
    reporter.info("Checking for broken filepaths in crates...");

    let volume_root = volume_root_of(library);

    // Filename → current location, from the freshly scanned media tree.
    let mut media_by_leaf: HashMap<String, String> = HashMap::new();
    for track in media.flattened_tracks() {
        media_by_leaf.insert(path::nfc_lower_filename(&track), track);
    }

    let subcrates = library.join("Subcrates");
    let Ok(entries) = std::fs::read_dir(&subcrates) else {
        return Ok(FixReport::default());
    };
    let mut crate_files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "crate"))
        .collect();
    crate_files.sort();

    let total = crate_files.len();
    let processed = AtomicUsize::new(0);
    let outcomes: Vec<CrateOutcome> = crate_files
        .par_iter()
        .filter_map(|file| {
            let outcome = process_crate(
                file,
                &media_by_leaf,
                index,
                volume_root.as_deref(),
                reporter,
            );
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            reporter.progress("Checking crates for broken paths", done, total);
            outcome
        })
        .collect();
    reporter.progress_complete("Checking crates for broken paths");

    // Ordered by old path so the sequential apply below is deterministic.
    let mut fixes: BTreeMap<String, String> = BTreeMap::new();
    for outcome in &outcomes {
        for (old, new) in &outcome.fixes {
            fixes.insert(old.clone(), new.clone());
        }
    }

    let mut report = FixReport::default();

    if fixes.is_empty() {
        reporter.info("No broken paths need fixing");
    } else {
        reporter.info(&format!(
            "Updating the library index with {} path fixes...",
            fixes.len()
        ));
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
        } else {
            reporter.info("No index paths were updated (paths not found in the index)");
        }
    }

    // Rewrite the dirty crates, preserving each crate's own metadata.
    for outcome in outcomes.iter().filter(|o| o.changed) {
        let original = match CrateFile::read_from(&outcome.file) {
            Ok(original) => original,
            Err(_) => continue,
        };
        let mut rewritten = CrateFile::new();
        rewritten.set_version(original.version());
        rewritten.set_sort_key(original.sort_key());
        rewritten.set_sort_revision(original.sort_revision());
        for column in original.columns() {
            rewritten.push_column(column);
        }
        rewritten.add_tracks(outcome.new_tracks.iter());

        match rewritten.write_to(&outcome.file) {
            Ok(()) => {
                report.crates_rewritten += 1;
                report.tracks_rewritten += outcome.new_tracks.len();
            }
            Err(err) => {
                reporter.error(&format!(
                    "Failed to write fixed crate {}: {err}",
                    outcome.file.display()
                ));
            }
        }
    }

    if report.crates_rewritten > 0 {
        reporter.info(&format!("Fixed {} crate files", report.crates_rewritten));
    } else {
        reporter.info("No broken paths found that could be fixed");
    }
    Ok(report)
}

/// The mount point the library lives on, when the library follows the
/// host's `<volume>/_Serato_` convention.
fn volume_root_of(library: &Path) -> Option<PathBuf> {
    let name = library.file_name()?.to_str()?;
    if name.eq_ignore_ascii_case("_Serato_") {
        library.parent().map(Path::to_path_buf)
    } else {
        None
    }
}

fn process_crate(
    file: &Path,
    media_by_leaf: &HashMap<String, String>,
    index: Option<&LibraryIndex>,
    volume_root: Option<&Path>,
    reporter: &dyn SyncReporter,
) -> Option<CrateOutcome> {
    let crate_file = match CrateFile::read_from(file) {
        Ok(crate_file) => crate_file,
        Err(err) => {
            reporter.error(&format!("Failed to read crate {}: {err}", file.display()));
            return None;
        }
    };

    let mut new_tracks = Vec::with_capacity(crate_file.track_count());
    let mut fixes = Vec::new();
    let mut changed = false;

    for track in crate_file.tracks() {
        let track_file = Path::new(track);
        let mut exists = track_file.exists();
        let mut resolved = track.clone();

        if !exists && track_file.is_relative() {
            if let Some(root) = volume_root {
                let candidate = root.join(track);
                if candidate.exists() {
                    exists = true;
                    resolved = candidate.to_string_lossy().into_owned();
                }
            }
        }

        if exists {
            let canon = canonicalize_for_crate(&resolved, volume_root);
            if canon != *track {
                changed = true;
            }
            // Keep the index in line with the crate; a diverging index
            // path for the same file makes the host list it twice.
            if let Some(index) = index {
                if let Some(stored) = index.original_path_by_filename(&resolved) {
                    if stored != canon {
                        fixes.push((stored.to_owned(), canon.clone()));
                    }
                }
            }
            new_tracks.push(canon);
            continue;
        }

        let leaf = path::nfc_lower_filename(track);
        let relocated = media_by_leaf
            .get(&leaf)
            .filter(|found| Path::new(found).exists());
        match relocated {
            Some(found) => {
                let rebound = rebind_path(found, index, volume_root);
                if *track != rebound {
                    fixes.push((track.clone(), rebound.clone()));
                }
                if let Some(index) = index {
                    if let Some(stored) = index.original_path_by_filename(found) {
                        if stored != rebound && stored != *track {
                            fixes.push((stored.to_owned(), rebound.clone()));
                        }
                    }
                }
                new_tracks.push(rebound);
                changed = true;
            }
            None => {
                // Not found anywhere: leave the broken reference as-is.
                new_tracks.push(track.clone());
            }
        }
    }

    Some(CrateOutcome {
        file: file.to_owned(),
        new_tracks,
        changed,
        fixes,
    })
}

/// The crate-internal form of a resolved path: volume root stripped first
/// (the mount the library sits on is not always under `/Volumes`), then the
/// usual canonical slashes-and-prefixes pass.
fn canonicalize_for_crate(resolved: &str, volume_root: Option<&Path>) -> String {
    let mut relative = resolved.to_owned();
    if let Some(root) = volume_root {
        let root = root.to_string_lossy();
        if let Some(stripped) = relative.strip_prefix(root.as_ref()) {
            relative = stripped.trim_start_matches('/').to_owned();
        }
    }
    path::canonical(&relative)
}

/// Combine the new directory (volume root stripped) with the filename bytes
/// the index has on record, so the rebound path matches the host's own
/// encoding of the file.
fn rebind_path(found: &str, index: Option<&LibraryIndex>, volume_root: Option<&Path>) -> String {
    let mut dir = Path::new(found)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(root) = volume_root {
        let root = root.to_string_lossy();
        if let Some(stripped) = dir.strip_prefix(root.as_ref()) {
            dir = stripped.trim_start_matches('/').to_owned();
        }
    }

    let leaf = index
        .and_then(|index| index.indexed_filename(found))
        .unwrap_or_else(|| path::filename(found).to_owned());

    if dir.is_empty() {
        leaf
    } else {
        format!("{dir}/{leaf}")
    }
}
