use std::path::PathBuf;

use seratosync_format::FormatError;

/// Unified error type covering all failure modes across the sync pipeline.
///
/// Only a handful of conditions are fatal to a run: configuration problems,
/// a failed backup, an empty media tree, and an ambiguous parent crate.
/// Everything else — an unreadable crate, a broken session file, a failed
/// duplicate move — is logged and skipped inside its stage and never
/// propagates past it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A required configuration option is empty.
    #[error("required option {option:?} is not set. Fill it in before starting a sync.")]
    MissingOption {
        /// Name of the missing option.
        option: &'static str,
    },

    /// The configured parent crate contains the crate-name delimiter.
    #[error(
        "invalid parent crate {name:?}: nested names are not supported. Use a single crate name like \"Current\", not \"Current%%2025\"."
    )]
    NestedParentCrate {
        /// The offending name.
        name: String,
    },

    /// The media scan found nothing to sync.
    #[error(
        "no supported media files found under {root}. Check that the music library path is correct."
    )]
    EmptyMediaTree {
        /// The scanned root.
        root: PathBuf,
    },

    /// The host library folder is absent and was not created.
    #[error("library folder {path} does not exist")]
    LibraryMissing {
        /// The expected library path.
        path: PathBuf,
    },

    /// More than one crate file matches the parent crate name ignoring case.
    #[error(
        "found {count} crate files named {name:?} differing only in case. Resolve the duplication in the host before syncing."
    )]
    AmbiguousParentCrate {
        /// The configured parent crate name.
        name: String,
        /// How many case-insensitive matches exist.
        count: usize,
    },

    /// The pre-sync backup failed; the sync is aborted for safety.
    #[error("backup failed: {source}. Sync aborted, nothing was modified.")]
    Backup {
        /// The underlying failure.
        #[source]
        source: Box<SyncError>,
    },

    /// The worker pool could not be constructed.
    #[error("failed to build worker pool: {reason}")]
    WorkerPool {
        /// Builder error text.
        reason: String,
    },

    /// A binary-format error from the codec layer.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Wraps `std::io::Error` for file operations.
    #[error("I/O error: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the pipeline crate.
pub type SyncResult<T> = Result<T, SyncError>;
