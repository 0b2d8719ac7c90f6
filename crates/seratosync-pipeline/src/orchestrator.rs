//! Fixed-sequence sync pipeline.
//!
//! One [`Orchestrator::run`] performs, in order: backup → media scan →
//! duplicate move (+ index repair + rescan) → library check → index load →
//! parent-crate validation → track-index build → crate-tree build →
//! optional clear → smart write → crate-path fixer → sidebar ordering.
//! Stages are sequential; the scan and the fixer parallelize internally on
//! the orchestrator's worker pool. Fatal errors return as [`SyncError`];
//! everything else is reported and absorbed inside its stage.

use std::path::Path;
use std::sync::Arc;

use seratosync_format::{index_repair, CrateFile, FormatError, LibraryIndex, PathFix};

use crate::backup;
use crate::config::SyncConfig;
use crate::crate_fixer;
use crate::crate_tree::CrateTree;
use crate::dupe_mover;
use crate::error::{SyncError, SyncResult};
use crate::report::{SyncReporter, TracingReporter};
use crate::scanner;
use crate::sidebar;
use crate::smart_writer;
use crate::track_index::TrackIndex;

/// Worker threads for the filesystem-bound stages.
fn filesystem_threads() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get().min(4))
}

/// End-of-run counters surfaced to the shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncSummary {
    pub tracks_found: usize,
    pub directories_found: usize,
    pub crates_updated: usize,
    pub crates_skipped: usize,
    pub tracks_skipped_existing: usize,
    pub duplicates_moved: usize,
    pub index_paths_fixed: usize,
    pub crates_repaired: usize,
}

/// Drives one sync run over a validated configuration.
pub struct Orchestrator {
    config: SyncConfig,
    reporter: Arc<dyn SyncReporter>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator reporting through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns configuration errors and worker-pool build failures.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    /// Build an orchestrator with an explicit reporter.
    pub fn with_reporter(
        config: SyncConfig,
        reporter: Arc<dyn SyncReporter>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(filesystem_threads())
            .build()
            .map_err(|err| SyncError::WorkerPool {
                reason: err.to_string(),
            })?;
        Ok(Self {
            config,
            reporter,
            pool,
        })
    }

    /// Run the full pipeline.
    ///
    /// # Errors
    ///
    /// Fatal conditions only: failed backup, empty media tree, missing
    /// library that the reporter declined to create, ambiguous parent
    /// crate, or an index write failure.
    pub fn run(&self) -> SyncResult<SyncSummary> {
        let reporter = self.reporter.as_ref();
        let mut summary = SyncSummary::default();
        reporter.info("seratosync started");

        // 1. Backup.
        if self.config.backup {
            if let Err(err) = backup::create_backup(&self.config.library, reporter) {
                reporter.error("Backup failed. Aborting sync for safety.");
                return Err(SyncError::Backup {
                    source: Box::new(err),
                });
            }
        }

        // 2. Scan the media tree.
        reporter.info(&format!(
            "Scanning media library {}...",
            self.config.music_root.display()
        ));
        let mut media = self.pool.install(|| scanner::scan(&self.config.music_root));
        if media.total_tracks() == 0 {
            reporter.error("Unable to find any supported files in the media library");
            return Err(SyncError::EmptyMediaTree {
                root: self.config.music_root.clone(),
            });
        }
        reporter.info(&format!(
            "Found {} tracks in {} directories",
            media.total_tracks(),
            media.total_directories()
        ));

        // 3. Duplicate move, index repair for moved files, rescan.
        if self.config.dupe_scan && self.config.dupe_move_enabled() {
            let moved = dupe_mover::scan_and_move(
                &self.config.music_root,
                &media,
                self.config.dupe_detection,
                self.config.dupe_move,
                reporter,
            )?;
            summary.duplicates_moved = moved.files_moved;

            if !moved.moved_to_kept.is_empty() {
                let fixes: Vec<PathFix> = moved
                    .moved_to_kept
                    .iter()
                    .map(|(old, new)| PathFix::from_paths(old, new))
                    .collect();
                let applied = index_repair::repair_index_file(
                    &self.config.library.join("database V2"),
                    &fixes,
                )?;
                if applied > 0 {
                    reporter.info(&format!(
                        "Updated {applied} index paths for moved duplicates"
                    ));
                }

                reporter.info("Rescanning media library after duplicate removal...");
                media = self.pool.install(|| scanner::scan(&self.config.music_root));
                reporter.info(&format!(
                    "Found {} tracks remaining",
                    media.total_tracks()
                ));
            }
        }

        // 4. Make sure the library folder exists.
        self.ensure_library_exists(reporter)?;

        // 5. Load the library index.
        let index_path = self.config.library.join("database V2");
        let index = match LibraryIndex::read_from(&index_path) {
            Ok(index) => {
                reporter.info(&format!(
                    "Loaded library index with {} tracks",
                    index.track_count()
                ));
                Some(Arc::new(index))
            }
            Err(FormatError::NotFound { .. }) => {
                reporter.info("No existing library index found. Skipping path normalization.");
                None
            }
            Err(err) => {
                reporter.error(&format!(
                    "Could not parse the library index, continuing without it: {err}"
                ));
                None
            }
        };

        // 6. Validate the parent crate.
        if let Some(parent) = self.config.parent_crate() {
            self.prepare_parent_crate(parent, reporter)?;
        }

        // 7. Track index for skip statistics.
        let track_index = self.config.skip_existing.then(|| {
            TrackIndex::create_from(
                &self.config.library,
                self.config.dedup_mode,
                index.clone(),
                reporter,
            )
        });

        // 8. Build the crate tree.
        let tree = CrateTree::build(
            &media,
            self.config.parent_crate(),
            track_index.as_ref(),
            index.clone(),
        );

        // 9. Optional clear.
        if self.config.clear_before_sync {
            smart_writer::clear_library(&self.config.library, reporter)?;
            if self.config.fix_broken_paths {
                // Benign: the fixer will see a freshly absent index and
                // apply zero index fixes.
                reporter.info(
                    "clear-before-sync removed the index; the path fixer will only touch crates",
                );
            }
        }

        // 10. Smart-write every crate.
        let stats = smart_writer::write_crates(&tree, &self.config.library, reporter)?;
        summary.crates_updated = stats.updated;
        summary.crates_skipped = stats.skipped;

        // 11. Crate-path fixer.
        if self.config.fix_broken_paths {
            let fix_report = self.pool.install(|| {
                crate_fixer::fix_broken_paths(
                    &self.config.library,
                    &media,
                    index.as_deref(),
                    reporter,
                )
            })?;
            summary.index_paths_fixed = fix_report.index_paths_fixed;
            summary.crates_repaired = fix_report.crates_rewritten;
        }

        if let Some(track_index) = &track_index {
            summary.tracks_skipped_existing = track_index.skipped_count();
            if summary.tracks_skipped_existing > 0 {
                reporter.info(&format!(
                    "Skipped {} duplicate tracks",
                    summary.tracks_skipped_existing
                ));
            }
        }

        // Log-only duplicate scan when moving is disabled.
        if self.config.dupe_scan && !self.config.dupe_move_enabled() {
            dupe_mover::log_duplicate_groups(&media, reporter);
        }

        summary.tracks_found = media.total_tracks();
        summary.directories_found = media.total_directories();
        reporter.info("Sync complete");

        // 12. Sidebar ordering.
        if self.config.sort_crates {
            sidebar::write_sidebar_order(&self.config.library, reporter)?;
        }

        Ok(summary)
    }

    fn ensure_library_exists(&self, reporter: &dyn SyncReporter) -> SyncResult<()> {
        let library = &self.config.library;
        if library.is_dir() {
            return Ok(());
        }
        let create = reporter.confirm(&format!(
            "Library folder '{}' does not exist. Create it and continue?",
            library.display()
        ));
        if !create {
            reporter.info("Sync halted");
            return Err(SyncError::LibraryMissing {
                path: library.clone(),
            });
        }
        std::fs::create_dir_all(library)?;
        reporter.info(&format!("Created library folder {}", library.display()));
        Ok(())
    }

    /// Create a stub parent crate when missing; refuse to run when several
    /// crate files differ from it only in case (the host would pick one at
    /// random).
    fn prepare_parent_crate(&self, parent: &str, reporter: &dyn SyncReporter) -> SyncResult<()> {
        reporter.info(&format!("Using parent crate: {parent}"));
        let subcrates = self.config.library.join("Subcrates");
        let parent_file = subcrates.join(format!("{parent}.crate"));

        if !parent_file.exists() {
            reporter.info(&format!(
                "Parent crate '{parent}' does not exist, creating it"
            ));
            CrateFile::new().write_to(&parent_file)?;
        }

        let matches = count_case_insensitive_matches(&subcrates, &format!("{parent}.crate"));
        if matches > 1 {
            reporter.error(&format!(
                "Duplicate parent crate detected: {matches} crates named '{parent}'"
            ));
            return Err(SyncError::AmbiguousParentCrate {
                name: parent.to_owned(),
                count: matches,
            });
        }
        Ok(())
    }
}

fn count_case_insensitive_matches(dir: &Path, file_name: &str) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let wanted = file_name.to_lowercase();
    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .eq(&wanted)
        })
        .count()
}
