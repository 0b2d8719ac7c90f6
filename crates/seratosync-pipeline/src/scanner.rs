//! Parallel media-tree scanner.
//!
//! Walks the music root and produces a [`MediaNode`] per directory. Child
//! directories of one parent are scanned concurrently on the installed
//! rayon pool; a single child is scanned inline to skip the fork overhead.
//! The assembled children are sorted by directory name, so the output is
//! deterministic regardless of worker completion order.
//!
//! Tracks are stored as realpaths (symlinks resolved) because that is the
//! form the host indexed them under on macOS; resolution failures fall back
//! to the unresolved absolute path. A directory that cannot be read is
//! logged and yields an empty subtree — a batch scan never aborts over one
//! bad folder.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

/// File extensions (case-insensitive) treated as media.
pub const MEDIA_EXTENSIONS: [&str; 17] = [
    "mp3", "flac", "wav", "ogg", "aif", "aiff", "aac", "alac", "m4a", "mov", "mp4", "avi", "flv",
    "mpg", "mpeg", "dv", "qtz",
];

/// One directory in the scanned media tree.
///
/// Immutable after the scan completes. A track appears in exactly one node:
/// the directory that contains it.
#[derive(Debug, Clone, Default)]
pub struct MediaNode {
    directory: String,
    tracks: BTreeSet<String>,
    children: Vec<MediaNode>,
}

impl MediaNode {
    /// Leaf name of this directory (`"."` for the scan root).
    #[must_use]
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Absolute track paths in codepoint order.
    #[must_use]
    pub fn tracks(&self) -> &BTreeSet<String> {
        &self.tracks
    }

    /// Child directories in name order.
    #[must_use]
    pub fn children(&self) -> &[MediaNode] {
        &self.children
    }

    /// Track count across this node and all descendants.
    #[must_use]
    pub fn total_tracks(&self) -> usize {
        self.tracks.len()
            + self
                .children
                .iter()
                .map(MediaNode::total_tracks)
                .sum::<usize>()
    }

    /// Directory count across all descendants.
    #[must_use]
    pub fn total_directories(&self) -> usize {
        self.children.len()
            + self
                .children
                .iter()
                .map(MediaNode::total_directories)
                .sum::<usize>()
    }

    /// Append every track in depth-first order to `out`.
    pub fn flatten_tracks(&self, out: &mut Vec<String>) {
        out.extend(self.tracks.iter().cloned());
        for child in &self.children {
            child.flatten_tracks(out);
        }
    }

    /// All tracks in depth-first order.
    #[must_use]
    pub fn flattened_tracks(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.flatten_tracks(&mut out);
        out
    }
}

/// Scan the media tree rooted at `root` on the current rayon pool.
#[must_use]
pub fn scan(root: &Path) -> MediaNode {
    scan_dir(root, ".".to_owned())
}

fn scan_dir(path: &Path, directory: String) -> MediaNode {
    let mut node = MediaNode {
        directory,
        ..MediaNode::default()
    };

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %path.display(), error = %err, "skipping unreadable directory");
            return node;
        }
    };

    let mut subdirs: Vec<(PathBuf, String)> = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let entry_path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(err) => {
                tracing::warn!(path = %entry_path.display(), error = %err, "skipping entry");
                continue;
            }
        };
        if file_type.is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            subdirs.push((entry_path, name));
        } else if is_media(&entry_path) {
            node.tracks.insert(resolve_track(&entry_path));
        }
    }

    let mut children = if subdirs.len() == 1 {
        let (child_path, child_name) = subdirs.pop().unwrap_or_default();
        vec![scan_dir(&child_path, child_name)]
    } else {
        subdirs
            .into_par_iter()
            .map(|(child_path, child_name)| scan_dir(&child_path, child_name))
            .collect()
    };
    children.sort_by(|a, b| a.directory.cmp(&b.directory));
    node.children = children;
    node
}

/// Resolve a track to its real path, falling back to the raw absolute path.
fn resolve_track(file: &Path) -> String {
    match std::fs::canonicalize(file) {
        Ok(real) => real.to_string_lossy().into_owned(),
        Err(err) => {
            tracing::debug!(file = %file.display(), error = %err, "realpath failed, using raw path");
            file.to_string_lossy().into_owned()
        }
    }
}

fn is_media(file: &Path) -> bool {
    let Some(extension) = file.extension() else {
        return false;
    };
    let extension = extension.to_string_lossy().to_lowercase();
    MEDIA_EXTENSIONS.contains(&extension.as_str())
}
