//! In-place path substitution inside the library index.
//!
//! A [`PathFix`] pairs an old `pfil` payload with its replacement, both as
//! UTF-16BE bytes. Fixes apply sequentially over a working buffer: each one
//! re-walks the block structure (offsets shift as payload lengths change),
//! splices the new payload in, and rewrites the enclosing `otrk` length by
//! the byte delta. Matching is exact-byte only — no Unicode-form coercion —
//! because a fix that "almost" matches would corrupt the host's catalog.
//!
//! Failure model: a fix whose old bytes match no `pfil` is silently skipped
//! and only counted fixes are reported. A structurally malformed index
//! aborts the whole batch and hands the caller back the original bytes with
//! zero applied; a partially mutated index must never reach the disk.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::bytes::{put_u32_at, u32_at, utf16be_bytes, ByteReader};
use crate::error::FormatResult;
use crate::path;

// ─── PathFix ────────────────────────────────────────────────────────────────

/// An old → new `pfil` payload substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFix {
    /// Exact bytes of the payload to find.
    pub old: Vec<u8>,
    /// Replacement payload bytes.
    pub new: Vec<u8>,
}

impl PathFix {
    /// Build a fix from raw UTF-16BE payloads.
    #[must_use]
    pub fn from_payloads(old: Vec<u8>, new: Vec<u8>) -> Self {
        Self { old, new }
    }

    /// Build a fix from path strings, canonicalizing both sides to the
    /// host's stored form (forward slashes, no drive or volume prefix)
    /// before encoding as UTF-16BE.
    #[must_use]
    pub fn from_paths(old: &str, new: &str) -> Self {
        Self {
            old: utf16be_bytes(&path::canonical(old)),
            new: utf16be_bytes(&path::canonical(new)),
        }
    }
}

/// Result of applying a batch of fixes.
#[derive(Debug)]
pub struct RepairOutcome {
    /// The repaired buffer, or the untouched original on abort.
    pub data: Vec<u8>,
    /// Number of fixes that matched and were applied.
    pub applied: usize,
}

// ─── Block walking ──────────────────────────────────────────────────────────

enum Walk {
    Found {
        otrk_pos: usize,
        field_pos: usize,
        payload_pos: usize,
    },
    NotFound,
    Malformed,
}

/// Locate the first `pfil` field whose payload equals `old` exactly,
/// walking the `otrk` block structure from the given offset.
fn find_pfil(data: &[u8], blocks_start: usize, old: &[u8]) -> Walk {
    let mut pos = blocks_start;
    while pos + 8 <= data.len() {
        let tag = &data[pos..pos + 4];
        let Some(block_len) = u32_at(data, pos + 4) else {
            return Walk::Malformed;
        };
        let block_end = pos + 8 + block_len as usize;
        if block_end > data.len() {
            return Walk::Malformed;
        }

        if tag == b"otrk" {
            let mut field_pos = pos + 8;
            while field_pos + 8 <= block_end {
                let field_tag = &data[field_pos..field_pos + 4];
                let Some(field_len) = u32_at(data, field_pos + 4) else {
                    return Walk::Malformed;
                };
                let payload_pos = field_pos + 8;
                let payload_end = payload_pos + field_len as usize;
                if payload_end > block_end {
                    return Walk::Malformed;
                }
                if field_tag == b"pfil"
                    && field_len as usize == old.len()
                    && &data[payload_pos..payload_end] == old
                {
                    return Walk::Found {
                        otrk_pos: pos,
                        field_pos,
                        payload_pos,
                    };
                }
                field_pos = payload_end;
            }
        }
        pos = block_end;
    }
    Walk::NotFound
}

/// Offset of the first block after the `vrsn` header, or `None` when the
/// header itself is malformed.
fn blocks_start(data: &[u8]) -> Option<usize> {
    let mut reader = ByteReader::new(data);
    reader.require_ascii("vrsn").ok()?;
    reader.skip(2).ok()?;
    let header_len = reader.read_u16().ok()? as usize;
    reader.skip(header_len).ok()?;
    Some(reader.position())
}

// ─── Apply ──────────────────────────────────────────────────────────────────

/// Apply a batch of fixes to index bytes.
///
/// Fixes are processed in order; after each applied fix the working buffer
/// is the input for the next. On a malformed structure the original input
/// comes back untouched with `applied == 0`.
#[must_use]
pub fn apply_path_fixes(original: &[u8], fixes: &[PathFix]) -> RepairOutcome {
    let Some(start) = blocks_start(original) else {
        tracing::warn!("library index header is malformed, leaving index untouched");
        return RepairOutcome {
            data: original.to_vec(),
            applied: 0,
        };
    };

    let mut data = original.to_vec();
    let mut applied = 0;

    for fix in fixes {
        match find_pfil(&data, start, &fix.old) {
            Walk::Found {
                otrk_pos,
                field_pos,
                payload_pos,
            } => {
                let old_len = fix.old.len();
                let new_len = fix.new.len();

                let mut patched =
                    Vec::with_capacity(data.len() + new_len.saturating_sub(old_len));
                patched.extend_from_slice(&data[..payload_pos]);
                patched.extend_from_slice(&fix.new);
                patched.extend_from_slice(&data[payload_pos + old_len..]);

                put_u32_at(&mut patched, field_pos + 4, new_len as u32);
                let otrk_len = u32_at(&data, otrk_pos + 4).unwrap_or(0) as i64;
                let delta = new_len as i64 - old_len as i64;
                put_u32_at(&mut patched, otrk_pos + 4, (otrk_len + delta) as u32);

                data = patched;
                applied += 1;
            }
            Walk::NotFound => {}
            Walk::Malformed => {
                tracing::warn!(
                    "library index block structure is malformed, leaving index untouched"
                );
                return RepairOutcome {
                    data: original.to_vec(),
                    applied: 0,
                };
            }
        }
    }

    RepairOutcome { data, applied }
}

/// Read an index file, apply fixes, and atomically replace it when anything
/// changed. A missing file applies zero fixes.
///
/// # Errors
///
/// Returns [`crate::error::FormatError::Io`] on read or write failure. The
/// final write goes through a temp file and rename so a crash never leaves a
/// half-written index behind.
pub fn repair_index_file(file: &Path, fixes: &[PathFix]) -> FormatResult<usize> {
    if !file.exists() {
        return Ok(0);
    }
    let original = fs::read(file)?;
    let outcome = apply_path_fixes(&original, fixes);
    if outcome.applied == 0 {
        return Ok(0);
    }

    let tmp = file.with_extension("seratosync-tmp");
    {
        let mut out = File::create(&tmp)?;
        out.write_all(&outcome.data)?;
        out.sync_all()?;
    }
    fs::rename(&tmp, file)?;
    tracing::info!(applied = outcome.applied, file = %file.display(), "repaired index paths");
    Ok(outcome.applied)
}
