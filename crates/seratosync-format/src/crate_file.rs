//! Crate container codec.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header                                       │
//! │   tag: b"vrsn" (4 bytes)                     │
//! │   two zero bytes                             │
//! │   version: 4 chars UTF-16BE (8 bytes)        │
//! │   literal "/Serato ScratchLive Crate" UTF-16 │
//! ├──────────────────────────────────────────────┤
//! │ osrt — sort metadata (full or short form)    │
//! │   [tvcn <u32 len> <sort name UTF-16BE>]      │
//! │   brev <5-byte sort revision>                │
//! ├──────────────────────────────────────────────┤
//! │ ovct × N — column definitions                │
//! │   tvcn <u32 len> <column name UTF-16BE>      │
//! │   tvcw <u32 = 2> 0x00 <one trailing byte>    │
//! ├──────────────────────────────────────────────┤
//! │ otrk × N — track entries                     │
//! │   ptrk <u32 len> <track path UTF-16BE>       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Unknown top-level blocks are skipped by their length field. A clean EOF
//! before the first `otrk` is an empty crate. Track paths are written in
//! canonical form (forward slashes, no volume prefix) with their Unicode
//! bytes untouched, and equality compares the canonical forms so that an
//! in-memory crate holding absolute paths matches its on-disk counterpart.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::bytes::{utf16be_bytes, ByteReader, ByteWriter};
use crate::error::FormatResult;
use crate::library_index::LibraryIndex;
use crate::path;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Version written when none was parsed.
pub const DEFAULT_VERSION: &str = "81.0";

/// Sort key written when none was parsed.
pub const DEFAULT_SORT_KEY: &str = "song";

/// Sort revision written when none was parsed.
pub const DEFAULT_SORT_REVISION: u64 = 1 << 8;

/// Column set written when none was parsed.
pub const DEFAULT_COLUMNS: [&str; 4] = ["song", "artist", "album", "length"];

/// Fixed UTF-16BE literal following the version string.
const FORMAT_LITERAL: &str = "/Serato ScratchLive Crate";

// ─── CrateFile ──────────────────────────────────────────────────────────────

/// In-memory representation of one `.crate` file.
///
/// Track insertion order is preserved through parse and serialize. Adding a
/// track whose NFC-lowercased filename is already present is a silent no-op;
/// the crate dedups on the leaf name only, because the host treats two paths
/// to the same filename as the same logical track.
#[derive(Debug, Clone, Default)]
pub struct CrateFile {
    version: Option<String>,
    sort_key: Option<String>,
    sort_revision: Option<u64>,
    columns: Vec<String>,
    tracks: Vec<String>,
    seen_leaves: HashSet<String>,
    /// Host index consulted so added tracks adopt the filename byte
    /// encoding the host already has on record. Never mutated through here.
    index: Option<Arc<LibraryIndex>>,
}

impl CrateFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the parsed library index used for filename-encoding lookup.
    pub fn set_index(&mut self, index: Arc<LibraryIndex>) {
        self.index = Some(index);
    }

    /// Crate format version (defaults to [`DEFAULT_VERSION`]).
    #[must_use]
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    /// Set the version string. Must be exactly four UTF-16 units.
    pub fn set_version(&mut self, version: impl Into<String>) {
        let version = version.into();
        debug_assert_eq!(
            version.encode_utf16().count(),
            4,
            "crate version must be 4 characters"
        );
        self.version = Some(version);
    }

    /// Sort column key (defaults to [`DEFAULT_SORT_KEY`]).
    #[must_use]
    pub fn sort_key(&self) -> &str {
        self.sort_key.as_deref().unwrap_or(DEFAULT_SORT_KEY)
    }

    pub fn set_sort_key(&mut self, sort_key: impl Into<String>) {
        self.sort_key = Some(sort_key.into());
    }

    /// Sort revision counter (defaults to [`DEFAULT_SORT_REVISION`]).
    #[must_use]
    pub fn sort_revision(&self) -> u64 {
        self.sort_revision.unwrap_or(DEFAULT_SORT_REVISION)
    }

    pub fn set_sort_revision(&mut self, revision: u64) {
        self.sort_revision = Some(revision);
    }

    /// Column names, falling back to [`DEFAULT_COLUMNS`] when none were set.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        if self.columns.is_empty() {
            DEFAULT_COLUMNS.iter().map(|&c| c.to_owned()).collect()
        } else {
            self.columns.clone()
        }
    }

    pub fn push_column(&mut self, name: impl Into<String>) {
        self.columns.push(name.into());
    }

    /// Track paths in insertion order, exact bytes as added or parsed.
    #[must_use]
    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Add a track path unless its NFC-lowercased filename is already
    /// present. When an index is attached and it knows this filename, the
    /// leaf is swapped for the index's exact byte encoding so the written
    /// crate collides with the host's existing entry instead of duplicating
    /// it.
    pub fn add_track(&mut self, track_path: &str) {
        let leaf_key = path::nfc_lower_filename(track_path);
        if !self.seen_leaves.insert(leaf_key) {
            return;
        }

        let mut track = track_path.to_owned();
        if let Some(index) = &self.index {
            if let Some(host_leaf) = index.indexed_filename(track_path) {
                if let Some(sep) = track_path.rfind(['/', '\\']) {
                    track = format!("{}/{}", &track_path[..sep], host_leaf);
                }
            }
        }
        self.tracks.push(track);
    }

    pub fn add_tracks<I, S>(&mut self, track_paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for track in track_paths {
            self.add_track(track.as_ref());
        }
    }

    // ─── Parse ──────────────────────────────────────────────────────────

    /// Parse a crate from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when the header or any block violates the
    /// layout. Callers in the sync pipeline skip such crates and continue.
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        let mut result = Self::new();
        let mut reader = ByteReader::new(data);

        reader.require_ascii("vrsn")?;
        reader.require_byte(0)?;
        reader.require_byte(0)?;
        result.version = Some(reader.read_utf16(8)?);
        reader.require_utf16_literal(FORMAT_LITERAL)?;

        // Metadata blocks until the first track.
        loop {
            if reader.remaining() < 4 {
                // Clean end before any otrk: empty crate.
                return Ok(result);
            }
            let tag = reader.read_bytes(4)?;
            match tag {
                b"otrk" => break,
                b"ovct" => {
                    let _block_len = reader.read_u32()?;
                    reader.require_ascii("tvcn")?;
                    let name_len = reader.read_u32()? as usize;
                    let column = reader.read_utf16(name_len)?;
                    result.columns.push(column);
                    reader.require_ascii("tvcw")?;
                    let _width_len = reader.read_u32()?;
                    reader.require_byte(0)?;
                    // Trailing width byte varies between host versions.
                    let _ = reader.read_u8()?;
                }
                b"osrt" => {
                    let _block_len = reader.read_u32()?;
                    // Full form carries tvcn + sort name; short form goes
                    // straight to brev.
                    if reader.peek(4) == Some(b"tvcn".as_slice()) {
                        reader.require_ascii("tvcn")?;
                        let name_len = reader.read_u32()? as usize;
                        result.sort_key = Some(reader.read_utf16(name_len)?);
                    }
                    reader.require_ascii("brev")?;
                    result.sort_revision = Some(reader.read_uint(5)?);
                }
                _ => {
                    let skip_len = reader.read_u32()? as usize;
                    reader.skip(skip_len)?;
                }
            }
        }

        // Track entries. The first otrk tag is already consumed.
        let mut first_track = true;
        loop {
            if !first_track && reader.expect_ascii("otrk")? {
                break;
            }
            first_track = false;

            let _record_len = reader.read_u32()?;
            reader.require_ascii("ptrk")?;
            let name_len = reader.read_u32()? as usize;
            let track_path = reader.read_utf16(name_len)?;
            result.add_track(&track_path);
        }

        Ok(result)
    }

    /// Read and parse a crate file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Io`] on read failure or any parse error.
    pub fn read_from(file: &Path) -> FormatResult<Self> {
        let data = fs::read(file)?;
        Self::parse(&data)
    }

    // ─── Serialize ──────────────────────────────────────────────────────

    /// Serialize to the on-disk byte layout.
    ///
    /// Each track path is canonicalized (slashes, volume prefix) but its
    /// Unicode bytes are preserved exactly.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(256 + self.tracks.len() * 64);

        w.write_ascii("vrsn");
        w.write_u8(0);
        w.write_u8(0);
        w.write_utf16(self.version());
        w.write_utf16(FORMAT_LITERAL);

        let sort_bytes = utf16be_bytes(self.sort_key());
        w.write_ascii("osrt");
        w.write_u32((sort_bytes.len() + 17) as u32);
        w.write_ascii("tvcn");
        w.write_u32(sort_bytes.len() as u32);
        w.write_bytes(&sort_bytes);
        w.write_ascii("brev");
        w.write_uint(self.sort_revision(), 5);

        for column in self.columns() {
            let col_bytes = utf16be_bytes(&column);
            w.write_ascii("ovct");
            w.write_u32((col_bytes.len() + 18) as u32);
            w.write_ascii("tvcn");
            w.write_u32(col_bytes.len() as u32);
            w.write_bytes(&col_bytes);
            w.write_ascii("tvcw");
            w.write_u32(2);
            w.write_u8(0);
            w.write_u8(b'0');
        }

        for track in &self.tracks {
            let uniform = path::canonical(track);
            let path_bytes = utf16be_bytes(&uniform);
            w.write_ascii("otrk");
            w.write_u32((path_bytes.len() + 8) as u32);
            w.write_ascii("ptrk");
            w.write_u32(path_bytes.len() as u32);
            w.write_bytes(&path_bytes);
        }

        w.into_bytes()
    }

    /// Serialize and write to `file`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Io`] on any write failure.
    pub fn write_to(&self, file: &Path) -> FormatResult<()> {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(file, self.to_bytes())?;
        Ok(())
    }
}

impl PartialEq for CrateFile {
    /// Semantic equality: version, sort metadata, columns, and the
    /// canonical-form track lists element-wise. Absolute-versus-relative
    /// and slash-direction differences do not cause inequality.
    fn eq(&self, other: &Self) -> bool {
        if self.sort_revision() != other.sort_revision()
            || self.version() != other.version()
            || self.sort_key() != other.sort_key()
            || self.columns() != other.columns()
            || self.tracks.len() != other.tracks.len()
        {
            return false;
        }
        self.tracks
            .iter()
            .zip(other.tracks.iter())
            .all(|(a, b)| path::canonical(a) == path::canonical(b))
    }
}

impl Eq for CrateFile {}
