//! Compare-then-write pass for the built crate tree.
//!
//! A crate file is rewritten only when its on-disk form differs from the
//! in-memory crate in the codec's semantic sense (same version, sort
//! metadata, columns, and canonical track list means equal). Skipping
//! identical crates keeps mtimes stable, which keeps the host from
//! re-reading an unchanged library on its next start.

use std::path::Path;

use seratosync_format::CrateFile;

use crate::crate_tree::CrateTree;
use crate::error::SyncResult;
use crate::report::SyncReporter;

/// Outcome counters for one write pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteStats {
    pub updated: usize,
    pub skipped: usize,
}

/// Write every named crate in the tree into `<library>/Subcrates`.
///
/// # Errors
///
/// A failed write aborts the pass: half-written libraries are worse than
/// aborted syncs. Unreadable existing crates are not errors — they count as
/// missing and are overwritten.
pub fn write_crates(
    tree: &CrateTree,
    library: &Path,
    reporter: &dyn SyncReporter,
) -> SyncResult<WriteStats> {
    let writable: Vec<_> = tree
        .crates()
        .iter()
        .filter(|built| !built.name.is_empty())
        .collect();

    let mut stats = WriteStats::default();
    let total = writable.len();

    for (current, built) in writable.iter().enumerate() {
        reporter.progress("Processing crates", current + 1, total);
        let target = library.join("Subcrates").join(built.name.file_name());
        if write_crate_smart(&built.crate_file, &target)? {
            stats.updated += 1;
        } else {
            stats.skipped += 1;
        }
    }
    reporter.progress_complete("Processing crates");

    if stats.updated > 0 {
        reporter.info(&format!(
            "Updated {} crates (skipped {} unchanged)",
            stats.updated, stats.skipped
        ));
    } else {
        reporter.info(&format!(
            "No crate files needed updating (skipped {} unchanged)",
            stats.skipped
        ));
    }
    Ok(stats)
}

/// Write one crate unless the on-disk file is already semantically equal.
/// Returns true when the file was written.
fn write_crate_smart(crate_file: &CrateFile, target: &Path) -> SyncResult<bool> {
    if target.exists() {
        match CrateFile::read_from(target) {
            Ok(existing) if existing == *crate_file => return Ok(false),
            Ok(_) => {}
            Err(err) => {
                // Corrupt or written by an unknown host version: force update.
                tracing::debug!(file = %target.display(), error = %err, "existing crate unreadable, rewriting");
            }
        }
    }
    crate_file.write_to(target)?;
    Ok(true)
}

/// The clear-before-sync step: delete the files directly inside `Crates`
/// and `Subcrates` (never recursing) and remove the `database V2` index.
pub fn clear_library(library: &Path, reporter: &dyn SyncReporter) -> SyncResult<()> {
    for dir_name in ["Crates", "Subcrates"] {
        let dir = library.join(dir_name);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let entry_path = entry.path();
            if entry_path.is_file() {
                if let Err(err) = std::fs::remove_file(&entry_path) {
                    tracing::warn!(file = %entry_path.display(), error = %err, "failed to delete");
                }
            }
        }
    }

    let index_file = library.join("database V2");
    if index_file.exists() {
        std::fs::remove_file(&index_file)?;
    }
    reporter.info("Cleared crate directories and library index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crate_tree::CrateTree;
    use crate::report::NullReporter;
    use crate::scanner;
    use std::fs;
    use std::path::PathBuf;

    fn music_fixture() -> (tempfile::TempDir, PathBuf) {
        let music = tempfile::tempdir().unwrap();
        fs::create_dir_all(music.path().join("Genre")).unwrap();
        fs::write(music.path().join("Genre/a.mp3"), b"x").unwrap();
        let root = music.path().to_owned();
        (music, root)
    }

    fn build_tree(root: &Path) -> CrateTree {
        let media = scanner::scan(root);
        CrateTree::build(&media, Some("Current"), None, None)
    }

    #[test]
    fn first_pass_writes_second_pass_skips() {
        let (_music, music_root) = music_fixture();
        let library = tempfile::tempdir().unwrap();

        let tree = build_tree(&music_root);
        let first = write_crates(&tree, library.path(), &NullReporter).unwrap();
        assert_eq!(first.updated, 2);
        assert_eq!(first.skipped, 0);

        let second = write_crates(&tree, library.path(), &NullReporter).unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 2);
    }

    #[test]
    fn unchanged_crate_keeps_its_mtime() {
        let (_music, music_root) = music_fixture();
        let library = tempfile::tempdir().unwrap();

        let tree = build_tree(&music_root);
        write_crates(&tree, library.path(), &NullReporter).unwrap();

        let crate_path = library.path().join("Subcrates/Current%%Genre.crate");
        let before = fs::metadata(&crate_path).unwrap().modified().unwrap();
        // Push the clock difference well past filesystem timestamp granularity.
        filetime::set_file_mtime(&crate_path, filetime::FileTime::from_unix_time(1_000_000, 0))
            .unwrap();
        let pinned = fs::metadata(&crate_path).unwrap().modified().unwrap();
        assert_ne!(before, pinned);

        write_crates(&tree, library.path(), &NullReporter).unwrap();
        let after = fs::metadata(&crate_path).unwrap().modified().unwrap();
        assert_eq!(pinned, after, "skip must not touch the file");
    }

    #[test]
    fn corrupt_existing_crate_is_overwritten() {
        let (_music, music_root) = music_fixture();
        let library = tempfile::tempdir().unwrap();
        fs::create_dir_all(library.path().join("Subcrates")).unwrap();
        fs::write(
            library.path().join("Subcrates/Current%%Genre.crate"),
            b"garbage",
        )
        .unwrap();

        let tree = build_tree(&music_root);
        let stats = write_crates(&tree, library.path(), &NullReporter).unwrap();
        assert_eq!(stats.updated, 2);

        let reread =
            CrateFile::read_from(&library.path().join("Subcrates/Current%%Genre.crate")).unwrap();
        assert_eq!(reread.track_count(), 1);
    }

    #[test]
    fn clear_library_removes_files_and_index() {
        let library = tempfile::tempdir().unwrap();
        fs::create_dir_all(library.path().join("Crates")).unwrap();
        fs::create_dir_all(library.path().join("Subcrates/nested")).unwrap();
        fs::write(library.path().join("Crates/a.crate"), b"x").unwrap();
        fs::write(library.path().join("Subcrates/b.crate"), b"x").unwrap();
        fs::write(library.path().join("database V2"), b"x").unwrap();

        clear_library(library.path(), &NullReporter).unwrap();
        assert!(!library.path().join("Crates/a.crate").exists());
        assert!(!library.path().join("Subcrates/b.crate").exists());
        assert!(!library.path().join("database V2").exists());
        // Directories themselves survive.
        assert!(library.path().join("Subcrates/nested").exists());
    }
}
