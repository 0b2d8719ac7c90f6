//! Tolerant scan of the existing crate files for dedup lookups.
//!
//! Unlike the strict codec in `seratosync-format`, this scanner only needs
//! the `ptrk` payloads and must survive crates written by any host version,
//! so it skips metadata blocks by length and pattern-matches `ptrk` inside
//! each `otrk` block instead of insisting on the exact field order. A crate
//! that cannot be read at all is skipped and the scan continues.

use std::collections::HashSet;
use std::path::Path;

use seratosync_format::bytes::{find_bytes, u32_at, utf16be_string, ByteReader};
use seratosync_format::error::FormatResult;
use seratosync_format::path;

/// Lookup keys extracted from every crate under `<library>/Subcrates`.
#[derive(Debug, Default)]
pub struct CrateScan {
    by_path: HashSet<String>,
    by_filename: HashSet<String>,
    track_count: usize,
    crate_count: usize,
}

impl CrateScan {
    /// Scan every `.crate` file in the library's `Subcrates` directory.
    #[must_use]
    pub fn scan_from(library: &Path) -> Self {
        let mut scan = Self::default();
        let subcrates = library.join("Subcrates");
        let Ok(entries) = std::fs::read_dir(&subcrates) else {
            return scan;
        };

        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "crate"))
            .collect();
        files.sort();

        for file in files {
            match scan.ingest_crate_file(&file) {
                Ok(()) => scan.crate_count += 1,
                Err(err) => {
                    tracing::warn!(file = %file.display(), error = %err, "skipping unreadable crate");
                }
            }
        }
        scan
    }

    fn ingest_crate_file(&mut self, file: &Path) -> FormatResult<()> {
        let data = std::fs::read(file)?;
        let mut reader = ByteReader::new(&data);

        // Header: vrsn, two zero bytes, then a u16 that doubles as the
        // length of the version + format literal that follows.
        reader.require_ascii("vrsn")?;
        reader.skip(2)?;
        let header_len = reader.read_u16()? as usize;
        reader.skip(header_len)?;

        while reader.remaining() >= 8 {
            let tag = reader.read_bytes(4)?;
            let block_len = reader.read_u32()? as usize;
            if block_len > reader.remaining() {
                break;
            }
            let block = reader.read_bytes(block_len)?;
            if tag == b"otrk" {
                if let Some(track_path) = extract_ptrk(block) {
                    self.add_track(&track_path);
                }
            }
            // osrt / ovct / anything else: skipped by length.
        }
        Ok(())
    }

    fn add_track(&mut self, track_path: &str) {
        if track_path.is_empty() {
            return;
        }
        self.by_path.insert(path::lookup_key(track_path));
        self.by_filename.insert(path::nfc_lower_filename(track_path));
        self.track_count += 1;
    }

    /// Normalized-path containment check.
    #[must_use]
    pub fn contains_by_path(&self, track_path: &str) -> bool {
        self.by_path.contains(&path::lookup_key(track_path))
    }

    /// NFC-lowercased-filename containment check.
    #[must_use]
    pub fn contains_by_filename(&self, track_path: &str) -> bool {
        self.by_filename.contains(&path::nfc_lower_filename(track_path))
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.track_count
    }

    #[must_use]
    pub fn crate_count(&self) -> usize {
        self.crate_count
    }
}

/// Pull the `ptrk` payload out of one `otrk` block, wherever it sits.
fn extract_ptrk(block: &[u8]) -> Option<String> {
    let pos = find_bytes(block, b"ptrk", 0)?;
    let len = u32_at(block, pos + 4)? as usize;
    let payload = block.get(pos + 8..pos + 8 + len)?;
    Some(utf16be_string(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seratosync_format::CrateFile;

    fn write_crate(library: &Path, name: &str, tracks: &[&str]) {
        let mut crate_file = CrateFile::new();
        crate_file.add_tracks(tracks.iter().copied());
        crate_file
            .write_to(&library.join("Subcrates").join(name))
            .unwrap();
    }

    #[test]
    fn scans_all_crates_in_subcrates() {
        let dir = tempfile::tempdir().unwrap();
        write_crate(dir.path(), "One.crate", &["Music/A.mp3", "Music/B.mp3"]);
        write_crate(dir.path(), "Two.crate", &["Music/C.mp3"]);

        let scan = CrateScan::scan_from(dir.path());
        assert_eq!(scan.crate_count(), 2);
        assert_eq!(scan.track_count(), 3);
        assert!(scan.contains_by_path("/Volumes/USB/Music/a.mp3"));
        assert!(scan.contains_by_filename("elsewhere/C.MP3"));
        assert!(!scan.contains_by_filename("elsewhere/D.mp3"));
    }

    #[test]
    fn missing_subcrates_dir_is_empty_scan() {
        let dir = tempfile::tempdir().unwrap();
        let scan = CrateScan::scan_from(dir.path());
        assert_eq!(scan.crate_count(), 0);
        assert_eq!(scan.track_count(), 0);
    }

    #[test]
    fn corrupt_crate_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_crate(dir.path(), "Good.crate", &["Music/A.mp3"]);
        std::fs::write(dir.path().join("Subcrates/Bad.crate"), b"junk").unwrap();

        let scan = CrateScan::scan_from(dir.path());
        assert_eq!(scan.crate_count(), 1);
        assert_eq!(scan.track_count(), 1);
    }

    #[test]
    fn non_crate_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Subcrates")).unwrap();
        std::fs::write(dir.path().join("Subcrates/readme.txt"), b"hi").unwrap();

        let scan = CrateScan::scan_from(dir.path());
        assert_eq!(scan.crate_count(), 0);
    }
}
