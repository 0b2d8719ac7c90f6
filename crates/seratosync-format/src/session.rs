//! Session history codec (`History/Sessions/*.session` and the
//! `History/history.database` catalog).
//!
//! # File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header                                      │
//! │   tag: b"vrsn" (4 bytes)                    │
//! │   length: u32                               │
//! │   version string: <length> bytes UTF-16BE   │
//! ├─────────────────────────────────────────────┤
//! │ oent × N — played-track entries             │
//! │   adat <u32 len> — fields keyed by integer: │
//! │     <u32 field id> <u32 len> <payload>      │
//! │   0x02 file path (may carry trailing NULs)  │
//! │   0x06/0x07/0x09/0x11/0x3F UTF-16BE strings │
//! │   0x0F/0x1C/0x1D u32 values                 │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The history catalog uses the same wrapping with `ocol` column blocks and
//! one `oses` block per session; field `0x2D` inside `oses` is the session
//! duration in seconds.
//!
//! Path updates preserve the exact count of trailing 16-bit NUL units the
//! original field carried, so a same-character-count substitution leaves the
//! file bit-identical in structure.

use std::fs;
use std::path::Path;

use crate::bytes::{find_bytes, u32_at, utf16be_bytes, utf16be_string, ByteReader, ByteWriter};
use crate::error::FormatResult;

// ─── Field identifiers ──────────────────────────────────────────────────────

/// Integer field keys used inside `adat` blocks.
pub mod field_id {
    pub const FILE_PATH: u32 = 0x02;
    pub const TITLE: u32 = 0x06;
    pub const ARTIST: u32 = 0x07;
    pub const GENRE: u32 = 0x09;
    pub const BPM: u32 = 0x0F;
    pub const KEY: u32 = 0x11;
    pub const START_TIME: u32 = 0x1C;
    pub const END_TIME: u32 = 0x1D;
    /// Session duration in seconds; only present in `oses` catalog blocks.
    pub const DURATION: u32 = 0x2D;
    pub const DECK: u32 = 0x3F;
}

/// Fields longer than this are treated as structure noise and end the
/// field walk, matching the host's own tolerance for trailing junk.
const MAX_FIELD_LEN: usize = 1024;

// ─── SessionEntry ───────────────────────────────────────────────────────────

/// One `oent` entry from a session file.
#[derive(Debug, Clone, Default)]
pub struct SessionEntry {
    /// Byte offset of the `oent` tag in the file.
    pub offset: usize,
    /// Declared entry payload length.
    pub length: usize,
    /// Field `0x02`, exactly as stored — trailing NUL units included.
    pub file_path: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub bpm: u32,
    pub key: Option<String>,
    /// Unix timestamp of the first play.
    pub start_time: u32,
    /// Unix timestamp of the last play.
    pub end_time: u32,
    pub deck: Option<String>,
}

// ─── SessionFile ────────────────────────────────────────────────────────────

/// Parsed session file, holding the original bytes for reconstruction.
#[derive(Debug, Clone)]
pub struct SessionFile {
    version: String,
    entries: Vec<SessionEntry>,
    raw: Vec<u8>,
}

fn strip_nuls(s: &str) -> String {
    s.replace('\u{0}', "")
}

impl SessionFile {
    /// Parse a session from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] on a missing or malformed header. Entries
    /// that fail to parse are skipped individually.
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        let mut reader = ByteReader::new(data);
        reader.require_ascii("vrsn")?;
        let version_len = reader.read_u32()? as usize;
        let version = reader.read_utf16(version_len)?;

        let mut entries = Vec::new();
        let mut pos = 0;
        while let Some(idx) = find_bytes(data, b"oent", pos) {
            if let Some(entry) = parse_entry(data, idx) {
                entries.push(entry);
            }
            pos = idx + 4;
        }

        Ok(Self {
            version,
            entries,
            raw: data.to_vec(),
        })
    }

    /// Read and parse a session file from disk.
    pub fn read_from(file: &Path) -> FormatResult<Self> {
        let data = fs::read(file)?;
        Self::parse(&data)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Current file bytes, including any applied path updates.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Unique file paths across all entries, NUL-stripped, in first-seen
    /// order.
    #[must_use]
    pub fn unique_paths(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut paths = Vec::new();
        for entry in &self.entries {
            if let Some(raw_path) = &entry.file_path {
                let clean = strip_nuls(raw_path);
                if !clean.is_empty() && seen.insert(clean.clone()) {
                    paths.push(clean);
                }
            }
        }
        paths
    }

    /// Session length from the earliest start to the latest end, in seconds.
    /// Zero when the entries carry no usable timestamps.
    #[must_use]
    pub fn duration_seconds(&self) -> u32 {
        let mut min_start = u32::MAX;
        let mut max_end = 0u32;
        for entry in &self.entries {
            if entry.start_time > 0 && entry.start_time < min_start {
                min_start = entry.start_time;
            }
            if entry.end_time > max_end {
                max_end = entry.end_time;
            }
        }
        if min_start == u32::MAX || max_end <= min_start {
            return 0;
        }
        max_end - min_start
    }

    /// Rewrite every `0x02` field equal to `old_path` (ignoring trailing
    /// 16-bit NUL units on both sides) to `new_path` padded with the same
    /// count of trailing NUL units as the original field. Recomputes the
    /// enclosing `adat` and `oent` lengths. Returns the number of fields
    /// rewritten.
    pub fn update_path(&mut self, old_path: &str, new_path: &str) -> usize {
        let old_clean = strip_nuls(old_path);
        let new_clean = strip_nuls(new_path);
        if old_clean.is_empty() {
            return 0;
        }
        let old_bytes = utf16be_bytes(&old_clean);

        let mut out = Vec::with_capacity(self.raw.len());
        let mut replaced = 0;

        let Some(first_oent) = find_bytes(&self.raw, b"oent", 0) else {
            return 0;
        };
        out.extend_from_slice(&self.raw[..first_oent]);

        let mut pos = first_oent;
        while pos < self.raw.len() {
            let Some(oent_pos) = find_bytes(&self.raw, b"oent", pos) else {
                out.extend_from_slice(&self.raw[pos..]);
                break;
            };
            out.extend_from_slice(&self.raw[pos..oent_pos]);

            let entry_len = u32_at(&self.raw, oent_pos + 4).unwrap_or(0) as usize;
            let entry_end = (oent_pos + 8 + entry_len).min(self.raw.len());
            let entry_data = &self.raw[oent_pos + 8..entry_end];

            if find_bytes(entry_data, &old_bytes, 0).is_some() {
                let rebuilt = rebuild_entry(entry_data, &old_clean, &new_clean, &mut replaced);
                out.extend_from_slice(b"oent");
                out.extend_from_slice(&(rebuilt.len() as u32).to_be_bytes());
                out.extend_from_slice(&rebuilt);
            } else {
                out.extend_from_slice(&self.raw[oent_pos..entry_end]);
            }
            pos = entry_end;
        }

        if replaced > 0 {
            self.raw = out;
            for entry in &mut self.entries {
                if let Some(stored) = &entry.file_path {
                    if strip_nuls(stored) == old_clean {
                        entry.file_path = Some(new_clean.clone());
                    }
                }
            }
        }
        replaced
    }

    /// Write the current bytes back to disk.
    pub fn write_to(&self, file: &Path) -> FormatResult<()> {
        fs::write(file, &self.raw)?;
        Ok(())
    }
}

/// Parse one entry at the given `oent` offset. Entries with unreadable
/// structure yield `None` and are skipped.
fn parse_entry(data: &[u8], oent_pos: usize) -> Option<SessionEntry> {
    let length = u32_at(data, oent_pos + 4)? as usize;
    let entry_end = (oent_pos + 8 + length).min(data.len());

    let mut entry = SessionEntry {
        offset: oent_pos,
        length,
        ..SessionEntry::default()
    };

    let adat_pos = find_bytes(&data[..entry_end], b"adat", oent_pos)?;
    let adat_len = u32_at(data, adat_pos + 4)? as usize;
    let field_end = (adat_pos + 8 + adat_len).min(entry_end);

    let mut field_pos = adat_pos + 8;
    while field_pos + 8 <= field_end {
        let field_id = u32_at(data, field_pos)?;
        let field_len = u32_at(data, field_pos + 4)? as usize;
        field_pos += 8;
        if field_len > MAX_FIELD_LEN || field_pos + field_len > field_end {
            break;
        }
        let payload = &data[field_pos..field_pos + field_len];
        match field_id {
            field_id::FILE_PATH => entry.file_path = Some(utf16be_string(payload)),
            field_id::TITLE => entry.title = Some(utf16be_string(payload)),
            field_id::ARTIST => entry.artist = Some(utf16be_string(payload)),
            field_id::GENRE => entry.genre = Some(utf16be_string(payload)),
            field_id::KEY => entry.key = Some(utf16be_string(payload)),
            field_id::DECK => entry.deck = Some(utf16be_string(payload)),
            field_id::BPM if field_len == 4 => {
                entry.bpm = u32_at(data, field_pos)?;
            }
            field_id::START_TIME if field_len == 4 => {
                entry.start_time = u32_at(data, field_pos)?;
            }
            field_id::END_TIME if field_len == 4 => {
                entry.end_time = u32_at(data, field_pos)?;
            }
            _ => {}
        }
        field_pos += field_len;
    }

    Some(entry)
}

/// Rebuild one entry payload with the path substituted, preserving every
/// other field byte-for-byte.
fn rebuild_entry(entry_data: &[u8], old_clean: &str, new_clean: &str, replaced: &mut usize) -> Vec<u8> {
    let Some(adat_pos) = find_bytes(entry_data, b"adat", 0) else {
        return entry_data.to_vec();
    };
    let adat_len = u32_at(entry_data, adat_pos + 4).unwrap_or(0) as usize;
    let adat_end = (adat_pos + 8 + adat_len).min(entry_data.len());

    let mut fields = ByteWriter::new();
    let mut field_pos = adat_pos + 8;
    while field_pos + 8 <= adat_end {
        let Some(field_id_val) = u32_at(entry_data, field_pos) else {
            break;
        };
        let Some(field_len) = u32_at(entry_data, field_pos + 4) else {
            break;
        };
        let field_len = field_len as usize;
        if field_len > MAX_FIELD_LEN || field_pos + 8 + field_len > adat_end {
            break;
        }
        let payload = &entry_data[field_pos + 8..field_pos + 8 + field_len];

        if field_id_val == field_id::FILE_PATH {
            let stored = utf16be_string(payload);
            let stored_clean = strip_nuls(&stored);
            if stored_clean == old_clean {
                let trailing_nuls = stored.chars().rev().take_while(|&c| c == '\u{0}').count();
                let mut padded = new_clean.to_owned();
                padded.extend(std::iter::repeat('\u{0}').take(trailing_nuls));
                let new_payload = utf16be_bytes(&padded);

                fields.write_u32(field_id_val);
                fields.write_u32(new_payload.len() as u32);
                fields.write_bytes(&new_payload);
                *replaced += 1;
                field_pos += 8 + field_len;
                continue;
            }
        }

        fields.write_u32(field_id_val);
        fields.write_u32(field_len as u32);
        fields.write_bytes(payload);
        field_pos += 8 + field_len;
    }

    let fields = fields.into_bytes();
    let mut out = Vec::with_capacity(entry_data.len());
    out.extend_from_slice(&entry_data[..adat_pos]);
    out.extend_from_slice(b"adat");
    out.extend_from_slice(&(fields.len() as u32).to_be_bytes());
    out.extend_from_slice(&fields);
    out.extend_from_slice(&entry_data[adat_end..]);
    out
}

// ─── History catalog scrub ──────────────────────────────────────────────────

/// Result of filtering the history catalog.
#[derive(Debug)]
pub struct ScrubOutcome {
    pub data: Vec<u8>,
    /// Number of `oses` blocks removed.
    pub removed: usize,
}

/// Copy a `history.database` buffer, dropping every `oses` block whose
/// `0x2D` duration field is positive and below `min_duration_secs`. The
/// `vrsn` header and `ocol` column blocks pass through unchanged.
#[must_use]
pub fn scrub_history_database(data: &[u8], min_duration_secs: u32) -> ScrubOutcome {
    let mut out = Vec::with_capacity(data.len());
    let mut removed = 0;
    let mut pos = 0;

    if data.len() >= 8 && &data[..4] == b"vrsn" {
        let vrsn_len = u32_at(data, 4).unwrap_or(0) as usize;
        let vrsn_end = (8 + vrsn_len).min(data.len());
        out.extend_from_slice(&data[..vrsn_end]);
        pos = vrsn_end;
    }

    while pos + 8 <= data.len() {
        let marker = &data[pos..pos + 4];
        if marker == b"ocol" || marker == b"oses" {
            let block_len = u32_at(data, pos + 4).unwrap_or(0) as usize;
            let block_end = (pos + 8 + block_len).min(data.len());

            if marker == b"oses" && oses_duration(&data[pos + 8..block_end])
                .is_some_and(|d| d > 0 && d < min_duration_secs)
            {
                removed += 1;
            } else {
                out.extend_from_slice(&data[pos..block_end]);
            }
            pos = block_end;
        } else {
            pos += 1;
        }
    }

    ScrubOutcome { data: out, removed }
}

/// Extract the `0x2D` duration field from an `oses` block payload.
fn oses_duration(block: &[u8]) -> Option<u32> {
    let adat_pos = find_bytes(block, b"adat", 0)?;
    let adat_len = u32_at(block, adat_pos + 4)? as usize;
    let field_end = (adat_pos + 8 + adat_len).min(block.len());

    let mut field_pos = adat_pos + 8;
    while field_pos + 8 <= field_end {
        let field_id_val = u32_at(block, field_pos)?;
        let field_len = u32_at(block, field_pos + 4)? as usize;
        if field_len > 4096 || field_pos + 8 + field_len > field_end {
            return None;
        }
        if field_id_val == field_id::DURATION && field_len == 4 {
            return u32_at(block, field_pos + 8);
        }
        field_pos += 8 + field_len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a session with one entry per (path, start, end) triple.
    fn session_bytes(entries: &[(&str, u32, u32)]) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_ascii("vrsn");
        let version = utf16be_bytes("1.0/Serato Scratch LIVE Review");
        w.write_u32(version.len() as u32);
        w.write_bytes(&version);

        for (track_path, start, end) in entries {
            let mut adat = ByteWriter::new();
            let path_bytes = utf16be_bytes(track_path);
            adat.write_u32(field_id::FILE_PATH);
            adat.write_u32(path_bytes.len() as u32);
            adat.write_bytes(&path_bytes);
            let title = utf16be_bytes("Some Title");
            adat.write_u32(field_id::TITLE);
            adat.write_u32(title.len() as u32);
            adat.write_bytes(&title);
            adat.write_u32(field_id::START_TIME);
            adat.write_u32(4);
            adat.write_u32(*start);
            adat.write_u32(field_id::END_TIME);
            adat.write_u32(4);
            adat.write_u32(*end);

            let adat = adat.into_bytes();
            let mut entry = ByteWriter::new();
            entry.write_ascii("adat");
            entry.write_u32(adat.len() as u32);
            entry.write_bytes(&adat);

            let entry = entry.into_bytes();
            w.write_ascii("oent");
            w.write_u32(entry.len() as u32);
            w.write_bytes(&entry);
        }
        w.into_bytes()
    }

    fn history_bytes(durations: &[u32]) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_ascii("vrsn");
        let version = utf16be_bytes("1.0/Serato Scratch LIVE History");
        w.write_u32(version.len() as u32);
        w.write_bytes(&version);

        let col = utf16be_bytes("name");
        w.write_ascii("ocol");
        w.write_u32((col.len() + 8) as u32);
        w.write_u32(1);
        w.write_u32(col.len() as u32);
        w.write_bytes(&col);

        for duration in durations {
            let mut adat = ByteWriter::new();
            adat.write_u32(field_id::DURATION);
            adat.write_u32(4);
            adat.write_u32(*duration);
            let adat = adat.into_bytes();

            let mut block = ByteWriter::new();
            block.write_ascii("adat");
            block.write_u32(adat.len() as u32);
            block.write_bytes(&adat);
            let block = block.into_bytes();

            w.write_ascii("oses");
            w.write_u32(block.len() as u32);
            w.write_bytes(&block);
        }
        w.into_bytes()
    }

    // ─── Parse ──────────────────────────────────────────────────────────

    #[test]
    fn parses_entries_and_fields() {
        let data = session_bytes(&[("/Volumes/V/X.mp3", 1000, 1300)]);
        let session = SessionFile::parse(&data).unwrap();
        assert_eq!(session.entry_count(), 1);
        let entry = &session.entries()[0];
        assert_eq!(entry.file_path.as_deref(), Some("/Volumes/V/X.mp3"));
        assert_eq!(entry.title.as_deref(), Some("Some Title"));
        assert_eq!(entry.start_time, 1000);
        assert_eq!(entry.end_time, 1300);
    }

    #[test]
    fn unique_paths_strip_nuls_and_dedup() {
        let data = session_bytes(&[
            ("/V/X.mp3\u{0}\u{0}", 1, 2),
            ("/V/X.mp3", 3, 4),
            ("/V/Y.mp3", 5, 6),
        ]);
        let session = SessionFile::parse(&data).unwrap();
        assert_eq!(session.unique_paths(), ["/V/X.mp3", "/V/Y.mp3"]);
    }

    #[test]
    fn duration_spans_first_start_to_last_end() {
        let data = session_bytes(&[("/V/a.mp3", 1000, 1200), ("/V/b.mp3", 1100, 1900)]);
        let session = SessionFile::parse(&data).unwrap();
        assert_eq!(session.duration_seconds(), 900);
    }

    #[test]
    fn duration_zero_without_timestamps() {
        let data = session_bytes(&[("/V/a.mp3", 0, 0)]);
        let session = SessionFile::parse(&data).unwrap();
        assert_eq!(session.duration_seconds(), 0);
    }

    #[test]
    fn bad_header_is_error() {
        assert!(SessionFile::parse(b"xxxx\0\0\0\0").is_err());
    }

    // ─── Path update ────────────────────────────────────────────────────

    #[test]
    fn update_preserves_trailing_nuls_and_lengths() {
        let padded = "/Volumes/V/X.mp3\u{0}\u{0}";
        let data = session_bytes(&[(padded, 1000, 1300)]);
        let original_len = data.len();

        let mut session = SessionFile::parse(&data).unwrap();
        let replaced = session.update_path("/Volumes/V/X.mp3", "/Volumes/V/Y.mp3");
        assert_eq!(replaced, 1);

        // Same character count: the file structure is bit-identical in size.
        assert_eq!(session.raw().len(), original_len);

        let reparsed = SessionFile::parse(session.raw()).unwrap();
        assert_eq!(
            reparsed.entries()[0].file_path.as_deref(),
            Some("/Volumes/V/Y.mp3\u{0}\u{0}")
        );
        // adat and oent lengths still consistent.
        assert_eq!(reparsed.entries()[0].start_time, 1000);
        assert_eq!(reparsed.entries()[0].end_time, 1300);
    }

    #[test]
    fn update_with_longer_path_recomputes_lengths() {
        let data = session_bytes(&[("/V/short.mp3", 10, 20), ("/V/other.mp3", 30, 40)]);
        let mut session = SessionFile::parse(&data).unwrap();

        let replaced = session.update_path("/V/short.mp3", "/V/a-much-longer-name.mp3");
        assert_eq!(replaced, 1);

        let reparsed = SessionFile::parse(session.raw()).unwrap();
        assert_eq!(
            reparsed.entries()[0].file_path.as_deref(),
            Some("/V/a-much-longer-name.mp3")
        );
        // The untouched entry still parses cleanly after the first grew.
        assert_eq!(
            reparsed.entries()[1].file_path.as_deref(),
            Some("/V/other.mp3")
        );
        assert_eq!(reparsed.entries()[1].end_time, 40);
    }

    #[test]
    fn update_misses_cleanly() {
        let data = session_bytes(&[("/V/a.mp3", 1, 2)]);
        let mut session = SessionFile::parse(&data).unwrap();
        assert_eq!(session.update_path("/V/zzz.mp3", "/V/y.mp3"), 0);
        assert_eq!(session.raw(), &data[..]);
    }

    // ─── History catalog scrub ──────────────────────────────────────────

    #[test]
    fn scrub_drops_short_sessions_only() {
        let data = history_bytes(&[120, 3600, 299]);
        let outcome = scrub_history_database(&data, 300);
        assert_eq!(outcome.removed, 2);

        let kept = scrub_history_database(&outcome.data, 300);
        assert_eq!(kept.removed, 0);
        // The surviving block still carries its duration.
        let oses = find_bytes(&outcome.data, b"oses", 0).unwrap();
        let len = u32_at(&outcome.data, oses + 4).unwrap() as usize;
        assert_eq!(
            oses_duration(&outcome.data[oses + 8..oses + 8 + len]),
            Some(3600)
        );
    }

    #[test]
    fn scrub_keeps_header_and_columns() {
        let data = history_bytes(&[60]);
        let outcome = scrub_history_database(&data, 300);
        assert_eq!(outcome.removed, 1);
        assert_eq!(&outcome.data[..4], b"vrsn");
        assert!(find_bytes(&outcome.data, b"ocol", 0).is_some());
        assert!(find_bytes(&outcome.data, b"oses", 0).is_none());
    }

    #[test]
    fn scrub_zero_duration_is_kept() {
        let data = history_bytes(&[0]);
        let outcome = scrub_history_database(&data, 300);
        assert_eq!(outcome.removed, 0);
    }
}
