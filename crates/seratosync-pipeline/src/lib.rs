//! Filesystem-to-Serato sync pipeline.
//!
//! This crate turns a directory tree of audio and video files into the crate
//! hierarchy of a Serato-style library, and keeps that library healthy:
//! it backs the library up, scans the media tree in parallel, builds one
//! crate per directory under a hierarchical naming convention, writes only
//! the crates that actually changed, rebinds broken track references in
//! crates and session history, quarantines duplicate files, and regenerates
//! the sorted sidebar manifest.
//!
//! The binary formats themselves live in [`seratosync_format`]; this crate
//! is the operational layer on top. Entry point: [`Orchestrator`].

pub mod backup;
pub mod config;
pub mod crate_fixer;
pub mod crate_scan;
pub mod crate_tree;
pub mod dupe_mover;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod scanner;
pub mod session_maintenance;
pub mod sidebar;
pub mod smart_writer;
pub mod track_index;

pub use backup::{create_backup, BackupReport};
pub use config::{DedupMode, DupeDetection, DupeMovePolicy, SyncConfig};
pub use crate_fixer::FixReport;
pub use crate_scan::CrateScan;
pub use crate_tree::{BuiltCrate, CrateName, CrateTree};
pub use dupe_mover::DupeMoveReport;
pub use error::{SyncError, SyncResult};
pub use orchestrator::{Orchestrator, SyncSummary};
pub use report::{NullReporter, SyncReporter, TracingReporter};
pub use scanner::{MediaNode, MEDIA_EXTENSIONS};
pub use session_maintenance::SessionFixReport;
pub use smart_writer::WriteStats;
pub use track_index::TrackIndex;
