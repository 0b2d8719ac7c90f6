//! Read-side codec for the host's main library index (`database V2`).
//!
//! # File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header                                      │
//! │   tag: b"vrsn" (4 bytes)                    │
//! │   two zero bytes                            │
//! │   length: u16                               │
//! │   version string: <length> bytes UTF-16BE   │
//! ├─────────────────────────────────────────────┤
//! │ otrk × N — track records                    │
//! │   <u32 record length> then fields:          │
//! │   <4-byte tag> <u32 len> <payload>          │
//! │   pfil = track path, tsiz = size-as-text,   │
//! │   all other tags opaque                     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The parser builds two lookup maps keyed by the normalized path and by the
//! NFC-lowercased filename, each optionally suffixed with the size string.
//! Values are the exact `pfil` payloads, so callers can re-emit the byte
//! encoding the host already carries. All mutation of the index goes through
//! [`crate::index_repair`]; this type is strictly read-only.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::bytes::ByteReader;
use crate::error::{FormatError, FormatResult};
use crate::path;

/// Parsed, read-only view of the host's track catalog.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    /// `lookup_key(path)` (+ `|size`) → exact `pfil` payload string.
    by_path: BTreeMap<String, String>,
    /// `nfc_lower_filename(path)` (+ `|size`) → exact `pfil` payload string.
    by_filename: BTreeMap<String, String>,
    track_count: usize,
}

fn compose_key(base: &str, size: Option<&str>) -> String {
    match size {
        Some(size) => format!("{base}|{size}"),
        None => base.to_owned(),
    }
}

impl LibraryIndex {
    /// Memory-map and parse an index file.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::NotFound`] when the file is absent and a
    /// parse error when the header is malformed. The sync pipeline treats
    /// both as "no index": dedup and encoding lookups are skipped.
    pub fn read_from(file: &Path) -> FormatResult<Self> {
        if !file.exists() {
            return Err(FormatError::NotFound {
                path: file.to_owned(),
            });
        }
        let handle = File::open(file)?;
        // SAFETY: read-only mapping; the host is not running during a sync,
        // so the file is not concurrently truncated.
        let mmap = unsafe { Mmap::map(&handle)? };
        Self::parse(&mmap)
    }

    /// Parse an index from raw bytes.
    ///
    /// Individual malformed records are tolerated (the host itself appends
    /// loosely), but a bad header is an error.
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        let mut reader = ByteReader::new(data);

        reader.require_ascii("vrsn")?;
        reader.skip(2)?;
        let header_len = reader.read_u16()? as usize;
        reader.skip(header_len)?;

        let mut index = Self::default();
        while reader.remaining() >= 4 {
            let tag = reader.read_bytes(4)?;
            if tag != b"otrk" {
                // Unknown or misaligned data: resynchronize on the next
                // 4-byte boundary, as the host's own reader does.
                continue;
            }
            if reader.remaining() < 4 {
                break;
            }
            let record_len = reader.read_u32()? as usize;
            if reader.remaining() < record_len {
                break;
            }
            let record = reader.read_bytes(record_len)?;
            index.ingest_record(record);
        }

        tracing::debug!(tracks = index.track_count, "parsed library index");
        Ok(index)
    }

    /// Pull `pfil` and `tsiz` out of one `otrk` payload and file the track
    /// under both lookup keys.
    fn ingest_record(&mut self, record: &[u8]) {
        let mut track_path: Option<String> = None;
        let mut size: Option<String> = None;

        let mut pos = 0;
        while pos + 8 <= record.len() {
            let tag = &record[pos..pos + 4];
            let len = u32::from_be_bytes([
                record[pos + 4],
                record[pos + 5],
                record[pos + 6],
                record[pos + 7],
            ]) as usize;
            pos += 8;
            if pos + len > record.len() {
                break;
            }
            let payload = &record[pos..pos + len];
            match tag {
                b"pfil" => track_path = Some(crate::bytes::utf16be_string(payload)),
                b"tsiz" => size = Some(crate::bytes::utf16be_string(payload)),
                _ => {}
            }
            pos += len;
        }

        if let Some(track_path) = track_path {
            let size = size.as_deref();
            let path_key = compose_key(&path::lookup_key(&track_path), size);
            self.by_path.insert(path_key, track_path.clone());

            let name_key = compose_key(&path::nfc_lower_filename(&track_path), size);
            self.by_filename.insert(name_key, track_path);

            self.track_count += 1;
        }
    }

    /// Number of tracks with a `pfil` payload.
    #[must_use]
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// Path-based existence check (normalized path + optional size string).
    #[must_use]
    pub fn contains_by_path(&self, track_path: &str, size: Option<&str>) -> bool {
        let key = compose_key(&path::lookup_key(track_path), size);
        self.by_path.contains_key(&key)
    }

    /// Filename-based existence check (NFC-lowercased leaf + optional size).
    #[must_use]
    pub fn contains_by_filename(&self, track_path: &str, size: Option<&str>) -> bool {
        let key = compose_key(&path::nfc_lower_filename(track_path), size);
        self.by_filename.contains_key(&key)
    }

    /// The exact path string the host has on record for this filename,
    /// regardless of size. Returns the first match in key order, so the
    /// result is deterministic.
    #[must_use]
    pub fn original_path_by_filename(&self, track_path: &str) -> Option<&str> {
        let leaf = path::nfc_lower_filename(track_path);
        if let Some(found) = self.by_filename.get(&leaf) {
            return Some(found);
        }
        let sized_prefix = format!("{leaf}|");
        self.by_filename
            .range(sized_prefix.clone()..)
            .next()
            .filter(|(key, _)| key.starts_with(&sized_prefix))
            .map(|(_, value)| value.as_str())
    }

    /// The host's exact filename bytes for this track, if it is indexed.
    ///
    /// Used when assembling crate entries so a freshly written crate refers
    /// to the same `pfil` encoding the index already carries.
    #[must_use]
    pub fn indexed_filename(&self, track_path: &str) -> Option<String> {
        self.original_path_by_filename(track_path)
            .map(|stored| path::filename(stored).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{utf16be_bytes, ByteWriter};

    /// Build a minimal index with the given (path, size) records.
    fn index_bytes(records: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_ascii("vrsn");
        w.write_u8(0);
        w.write_u8(0);
        let version = utf16be_bytes("2.0/Serato Scratch LIVE Database");
        w.write_uint(version.len() as u64, 2);
        w.write_bytes(&version);

        for (track_path, size) in records {
            let mut record = ByteWriter::new();
            let path_bytes = utf16be_bytes(track_path);
            record.write_ascii("pfil");
            record.write_u32(path_bytes.len() as u32);
            record.write_bytes(&path_bytes);
            if let Some(size) = size {
                let size_bytes = utf16be_bytes(size);
                record.write_ascii("tsiz");
                record.write_u32(size_bytes.len() as u32);
                record.write_bytes(&size_bytes);
            }
            // An opaque field the parser must skip by length.
            let title = utf16be_bytes("ignored");
            record.write_ascii("tsng");
            record.write_u32(title.len() as u32);
            record.write_bytes(&title);

            let record = record.into_bytes();
            w.write_ascii("otrk");
            w.write_u32(record.len() as u32);
            w.write_bytes(&record);
        }
        w.into_bytes()
    }

    #[test]
    fn parses_track_count() {
        let data = index_bytes(&[
            ("Music/A.mp3", Some("4.5MB")),
            ("Music/B.mp3", None),
        ]);
        let index = LibraryIndex::parse(&data).unwrap();
        assert_eq!(index.track_count(), 2);
    }

    #[test]
    fn contains_by_path_matches_volume_and_case_variants() {
        let data = index_bytes(&[("Music/A.mp3", Some("4.5MB"))]);
        let index = LibraryIndex::parse(&data).unwrap();
        assert!(index.contains_by_path("/Volumes/USB/Music/a.mp3", Some("4.5MB")));
        assert!(!index.contains_by_path("/Volumes/USB/Music/a.mp3", Some("9.9MB")));
        assert!(!index.contains_by_path("Music/zzz.mp3", Some("4.5MB")));
    }

    #[test]
    fn contains_by_filename_ignores_directory() {
        let data = index_bytes(&[("Music/Deep/A.mp3", None)]);
        let index = LibraryIndex::parse(&data).unwrap();
        assert!(index.contains_by_filename("/somewhere/else/A.MP3", None));
    }

    #[test]
    fn filename_lookup_folds_unicode_form() {
        // Host stores NFD, filesystem reports NFC.
        let data = index_bytes(&[("Music/Beyonce\u{0301}.mp3", Some("4.5MB"))]);
        let index = LibraryIndex::parse(&data).unwrap();
        assert!(index.contains_by_filename("X/Beyonc\u{00e9}.mp3", Some("4.5MB")));
    }

    #[test]
    fn original_path_returns_exact_bytes() {
        let nfd = "Music/Beyonce\u{0301}.mp3";
        let data = index_bytes(&[(nfd, Some("4.5MB"))]);
        let index = LibraryIndex::parse(&data).unwrap();
        let stored = index
            .original_path_by_filename("/new/dir/Beyonc\u{00e9}.mp3")
            .unwrap();
        assert_eq!(stored, nfd);
    }

    #[test]
    fn indexed_filename_is_the_stored_leaf() {
        let nfd = "Music/Beyonce\u{0301}.mp3";
        let data = index_bytes(&[(nfd, None)]);
        let index = LibraryIndex::parse(&data).unwrap();
        assert_eq!(
            index.indexed_filename("/new/Beyonc\u{00e9}.mp3").unwrap(),
            "Beyonce\u{0301}.mp3"
        );
    }

    #[test]
    fn unknown_filename_has_no_original_path() {
        let data = index_bytes(&[("Music/A.mp3", None)]);
        let index = LibraryIndex::parse(&data).unwrap();
        assert!(index.original_path_by_filename("Music/missing.mp3").is_none());
    }

    #[test]
    fn bad_header_is_error() {
        let err = LibraryIndex::parse(b"not a database").unwrap_err();
        assert!(matches!(err, FormatError::FormatMismatch { .. }));
    }

    #[test]
    fn truncated_final_record_is_tolerated() {
        let mut data = index_bytes(&[("Music/A.mp3", None), ("Music/B.mp3", None)]);
        data.truncate(data.len() - 6);
        let index = LibraryIndex::parse(&data).unwrap();
        assert_eq!(index.track_count(), 1);
    }

    #[test]
    fn missing_file_reports_not_found() {
        let err = LibraryIndex::read_from(Path::new("/nonexistent/database V2")).unwrap_err();
        assert!(matches!(err, FormatError::NotFound { .. }));
    }
}
