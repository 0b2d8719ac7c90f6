//! Unified dedup lookup over the library index and the existing crates.
//!
//! The crate tree builder asks one question — "does the host already know
//! this track?" — and this type answers it in one of three modes without the
//! caller caring which source (index or crate scan) produced the hit. The
//! skipped counter is atomic because the builder may ask from worker
//! threads.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use seratosync_format::LibraryIndex;

use crate::config::DedupMode;
use crate::crate_scan::CrateScan;
use crate::report::SyncReporter;

/// Read-only view combining the parsed index with a crate-file scan.
#[derive(Debug)]
pub struct TrackIndex {
    mode: DedupMode,
    database: Option<Arc<LibraryIndex>>,
    crate_scan: Option<CrateScan>,
    skipped: AtomicUsize,
}

impl TrackIndex {
    /// Build a track index for the given library, reusing an already-parsed
    /// library index when the orchestrator has one.
    #[must_use]
    pub fn create_from(
        library: &Path,
        mode: DedupMode,
        database: Option<Arc<LibraryIndex>>,
        reporter: &dyn SyncReporter,
    ) -> Self {
        if mode == DedupMode::Off {
            reporter.info("Deduplication disabled");
            return Self {
                mode,
                database: None,
                crate_scan: None,
                skipped: AtomicUsize::new(0),
            };
        }

        if let Some(database) = &database {
            reporter.info(&format!(
                "Found {} tracks in the library index",
                database.track_count()
            ));
        }

        reporter.info("Scanning existing crate files...");
        let crate_scan = CrateScan::scan_from(library);
        reporter.info(&format!(
            "Found {} tracks in {} crate files",
            crate_scan.track_count(),
            crate_scan.crate_count()
        ));

        Self {
            mode,
            database,
            crate_scan: Some(crate_scan),
            skipped: AtomicUsize::new(0),
        }
    }

    /// True when the track is already known to either source. Every hit
    /// bumps the skipped counter; the crate builder uses this purely for
    /// the end-of-run statistic.
    pub fn should_skip(&self, track_path: &str, size: Option<&str>) -> bool {
        let exists = match self.mode {
            DedupMode::Off => false,
            DedupMode::Filename => {
                self.database
                    .as_ref()
                    .is_some_and(|db| db.contains_by_filename(track_path, size))
                    || self
                        .crate_scan
                        .as_ref()
                        .is_some_and(|scan| scan.contains_by_filename(track_path))
            }
            DedupMode::Path => {
                self.database
                    .as_ref()
                    .is_some_and(|db| db.contains_by_path(track_path, size))
                    || self
                        .crate_scan
                        .as_ref()
                        .is_some_and(|scan| scan.contains_by_path(track_path))
            }
        };

        if exists {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        exists
    }

    /// How many lookups have hit so far.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    /// The underlying library index, when one was loaded.
    #[must_use]
    pub fn database(&self) -> Option<&Arc<LibraryIndex>> {
        self.database.as_ref()
    }
}
