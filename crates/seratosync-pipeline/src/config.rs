//! Configuration types for the sync pipeline.
//!
//! [`SyncConfig`] carries every knob the orchestrator reads. Loading these
//! values from a file is the shell's job; the pipeline only defines the
//! shape, the defaults, and the validation rules.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// How the track index decides that a scanned file already exists in the
/// host library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupMode {
    /// Never skip anything.
    Off,
    /// Match on normalized path plus size string. Default.
    Path,
    /// Match on NFC-lowercased filename plus size string.
    Filename,
}

/// How duplicate files on the music drive are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DupeDetection {
    /// No duplicate detection.
    Off,
    /// Fingerprint is the NFC-lowercased leaf filename.
    NameOnly,
    /// Fingerprint is the leaf filename plus the byte size.
    NameAndSize,
}

/// Which copy of a duplicate group survives a move pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DupeMovePolicy {
    /// Moving disabled; detection may still log groups.
    #[serde(alias = "false")]
    Off,
    /// Keep the file with the newest mtime, move the rest.
    KeepNewest,
    /// Keep the file with the oldest mtime, move the rest.
    KeepOldest,
}

/// All tuning knobs for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root of the music tree to scan.
    pub music_root: PathBuf,

    /// The host library folder (the `_Serato_` directory).
    pub library: PathBuf,

    /// Optional crate name prefixed to every generated crate.
    /// Must not contain the `%%` delimiter.
    pub parent_crate: Option<String>,

    /// Snapshot the library before touching it. Default: true.
    pub backup: bool,

    /// Delete crate files and the index before writing. Default: false.
    pub clear_before_sync: bool,

    /// Consult the track index to count already-known tracks. Default: true.
    pub skip_existing: bool,

    /// Matching mode for [`skip_existing`](Self::skip_existing).
    pub dedup_mode: DedupMode,

    /// Rebind broken crate paths after the main write pass. Default: false.
    pub fix_broken_paths: bool,

    /// Regenerate the sorted sidebar manifest. Default: false.
    pub sort_crates: bool,

    /// Scan the music drive for duplicate files. Default: false.
    pub dupe_scan: bool,

    /// Fingerprint used by the duplicate scan.
    pub dupe_detection: DupeDetection,

    /// Move policy for duplicate groups.
    pub dupe_move: DupeMovePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            music_root: PathBuf::new(),
            library: PathBuf::new(),
            parent_crate: None,
            backup: true,
            clear_before_sync: false,
            skip_existing: true,
            dedup_mode: DedupMode::Path,
            fix_broken_paths: false,
            sort_crates: false,
            dupe_scan: false,
            dupe_detection: DupeDetection::Off,
            dupe_move: DupeMovePolicy::Off,
        }
    }
}

impl SyncConfig {
    /// The parent crate name, trimmed, with empty strings treated as unset.
    #[must_use]
    pub fn parent_crate(&self) -> Option<&str> {
        self.parent_crate
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// True when the duplicate scan is allowed to move files.
    #[must_use]
    pub fn dupe_move_enabled(&self) -> bool {
        self.dupe_move != DupeMovePolicy::Off
    }

    /// Check the run-blocking invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingOption`] for an empty music root or
    /// library path, and [`SyncError::NestedParentCrate`] when the parent
    /// crate name contains the `%%` delimiter.
    pub fn validate(&self) -> SyncResult<()> {
        if self.music_root.as_os_str().is_empty() {
            return Err(SyncError::MissingOption {
                option: "music_root",
            });
        }
        if self.library.as_os_str().is_empty() {
            return Err(SyncError::MissingOption { option: "library" });
        }
        if let Some(name) = self.parent_crate() {
            if name.contains("%%") {
                return Err(SyncError::NestedParentCrate {
                    name: name.to_owned(),
                });
            }
        }
        Ok(())
    }
}
