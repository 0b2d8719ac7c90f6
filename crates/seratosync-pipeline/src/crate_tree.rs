//! Maps the scanned media tree onto a hierarchy of crates.
//!
//! Each directory becomes one crate holding exactly that directory's tracks
//! — descendant tracks are not propagated upward. Crate names concatenate
//! the directory segments with the host's `%%` delimiter, optionally under
//! a configured parent crate: parent `Current` over `Genre/House` yields
//! `Current.crate`, `Current%%Genre.crate`, `Current%%Genre%%House.crate`.

use std::sync::Arc;

use seratosync_format::{path, CrateFile, LibraryIndex};

use crate::scanner::MediaNode;
use crate::track_index::TrackIndex;

/// Delimiter between crate-name segments in a serialized name.
pub const NAME_DELIMITER: &str = "%%";

/// Extension of crate files on disk.
pub const CRATE_EXTENSION: &str = ".crate";

// ─── CrateName ──────────────────────────────────────────────────────────────

/// Hierarchical crate name: an ordered list of directory segments.
///
/// The root name is empty when no parent crate is configured; an empty name
/// has no file representation and its crate is never written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CrateName {
    segments: Vec<String>,
}

impl CrateName {
    /// Name for the scan root: the parent crate, or empty when unset.
    #[must_use]
    pub fn root(parent_crate: Option<&str>) -> Self {
        Self {
            segments: parent_crate.map(str::to_owned).into_iter().collect(),
        }
    }

    /// Name for a child directory under this name.
    #[must_use]
    pub fn child(&self, directory: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(directory.to_owned());
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Serialized name without extension, segments joined with `%%`.
    #[must_use]
    pub fn as_string(&self) -> String {
        self.segments.join(NAME_DELIMITER)
    }

    /// On-disk file name: serialized name plus `.crate`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{CRATE_EXTENSION}", self.as_string())
    }
}

impl std::fmt::Display for CrateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}

// ─── CrateTree ──────────────────────────────────────────────────────────────

/// One crate produced by the build, tagged with its depth.
#[derive(Debug)]
pub struct BuiltCrate {
    pub name: CrateName,
    pub crate_file: CrateFile,
    /// 0 for the root, 1 for first-level crates, deeper for subcrates.
    pub level: usize,
}

/// The full set of crates derived from a media tree.
#[derive(Debug, Default)]
pub struct CrateTree {
    crates: Vec<BuiltCrate>,
}

impl CrateTree {
    /// Build one crate per media node.
    ///
    /// When a `library_index` is supplied, each crate adopts the host's
    /// filename byte encoding for tracks the index already knows. When a
    /// `track_index` is supplied, every track is looked up once so the
    /// skipped-existing statistic reflects this run; lookups never exclude
    /// a track from its crate.
    #[must_use]
    pub fn build(
        root: &MediaNode,
        parent_crate: Option<&str>,
        track_index: Option<&TrackIndex>,
        library_index: Option<Arc<LibraryIndex>>,
    ) -> Self {
        let mut tree = Self::default();
        tree.build_node(
            root,
            CrateName::root(parent_crate),
            0,
            track_index,
            &library_index,
        );
        tree
    }

    fn build_node(
        &mut self,
        node: &MediaNode,
        name: CrateName,
        level: usize,
        track_index: Option<&TrackIndex>,
        library_index: &Option<Arc<LibraryIndex>>,
    ) {
        let mut crate_file = CrateFile::new();
        if let Some(index) = library_index {
            crate_file.set_index(Arc::clone(index));
        }
        crate_file.add_tracks(node.tracks().iter());

        if let Some(track_index) = track_index {
            for track in node.tracks() {
                let size = std::fs::metadata(track).map(|m| m.len()).unwrap_or(0);
                track_index.should_skip(track, Some(&path::format_track_size(size)));
            }
        }

        self.crates.push(BuiltCrate {
            name: name.clone(),
            crate_file,
            level,
        });

        for child in node.children() {
            self.build_node(
                child,
                name.child(child.directory()),
                level + 1,
                track_index,
                library_index,
            );
        }
    }

    /// Every built crate, root first, children in directory order.
    #[must_use]
    pub fn crates(&self) -> &[BuiltCrate] {
        &self.crates
    }

    /// Crates directly under the root.
    #[must_use]
    pub fn first_level_count(&self) -> usize {
        self.crates.iter().filter(|c| c.level == 1).count()
    }

    /// Crates deeper than one level.
    #[must_use]
    pub fn subcrate_count(&self) -> usize {
        self.crates.iter().filter(|c| c.level > 1).count()
    }

    /// Total tracks across all crates.
    #[must_use]
    pub fn total_tracks(&self) -> usize {
        self.crates.iter().map(|c| c.crate_file.track_count()).sum()
    }

    /// Serialized names of every writable crate (nonempty names only).
    #[must_use]
    pub fn crate_names(&self) -> Vec<String> {
        self.crates
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| c.name.as_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner;
    use std::fs;
    use std::path::Path;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    fn scan_fixture() -> (tempfile::TempDir, MediaNode) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Genre/House")).unwrap();
        touch(&dir.path().join("root.mp3"));
        touch(&dir.path().join("Genre/a.mp3"));
        touch(&dir.path().join("Genre/House/deep.mp3"));
        let tree = scanner::scan(dir.path());
        (dir, tree)
    }

    #[test]
    fn name_composition_uses_delimiter() {
        let root = CrateName::root(Some("Current"));
        let genre = root.child("Genre");
        let house = genre.child("House");
        assert_eq!(root.file_name(), "Current.crate");
        assert_eq!(genre.file_name(), "Current%%Genre.crate");
        assert_eq!(house.file_name(), "Current%%Genre%%House.crate");
    }

    #[test]
    fn rootless_name_is_empty() {
        let root = CrateName::root(None);
        assert!(root.is_empty());
        assert_eq!(root.child("Genre").as_string(), "Genre");
    }

    #[test]
    fn one_crate_per_node_with_matching_depth() {
        let (_dir, media) = scan_fixture();
        let tree = CrateTree::build(&media, Some("Current"), None, None);

        let names: Vec<(String, usize)> = tree
            .crates()
            .iter()
            .map(|c| (c.name.as_string(), c.level))
            .collect();
        assert_eq!(
            names,
            [
                ("Current".to_owned(), 0),
                ("Current%%Genre".to_owned(), 1),
                ("Current%%Genre%%House".to_owned(), 2),
            ]
        );
        // Segment count equals depth from the parent level.
        for built in tree.crates() {
            assert_eq!(built.name.segments().len(), built.level + 1);
        }
    }

    #[test]
    fn crates_hold_only_their_directory_tracks() {
        let (_dir, media) = scan_fixture();
        let tree = CrateTree::build(&media, Some("Current"), None, None);

        let by_name: std::collections::HashMap<String, usize> = tree
            .crates()
            .iter()
            .map(|c| (c.name.as_string(), c.crate_file.track_count()))
            .collect();
        assert_eq!(by_name["Current"], 1);
        assert_eq!(by_name["Current%%Genre"], 1);
        assert_eq!(by_name["Current%%Genre%%House"], 1);
        assert_eq!(tree.total_tracks(), 3);
    }

    #[test]
    fn level_classification_counts() {
        let (_dir, media) = scan_fixture();
        let tree = CrateTree::build(&media, None, None, None);
        assert_eq!(tree.first_level_count(), 1);
        assert_eq!(tree.subcrate_count(), 1);
    }

    #[test]
    fn depth_zero_tree_produces_only_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("only.mp3"));
        let media = scanner::scan(dir.path());

        let tree = CrateTree::build(&media, Some("Current"), None, None);
        assert_eq!(tree.crates().len(), 1);
        assert_eq!(tree.crates()[0].name.as_string(), "Current");
    }
}
