//! Path-identity layer: canonical track paths and Unicode-stable lookup keys.
//!
//! The host stores paths volume-relative with forward slashes, and on macOS
//! in NFD. Filesystem APIs hand back NFC or NFD depending on platform and
//! mount. Every comparison in the sync pipeline therefore goes through one
//! of two forms:
//!
//! - [`canonical`] — slash and prefix normalization only, Unicode bytes
//!   untouched. This is the on-disk track form; writing anything else
//!   creates duplicate index entries on the host side.
//! - [`lookup_key`] / [`nfc_lower_filename`] — NFC + lowercase forms used
//!   purely as map keys, never written back.

use unicode_normalization::UnicodeNormalization;

/// Canonicalize a track path the way the host stores it.
///
/// Backslashes become forward slashes, a Windows drive prefix
/// (`C:/`) and a macOS volume prefix (`/Volumes/<name>/`) are stripped.
/// Unicode form is deliberately preserved.
#[must_use]
pub fn canonical(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    let stripped = strip_drive_prefix(&slashed, false);
    strip_volume_prefix(stripped, false).to_owned()
}

/// Lowercased, NFC-normalized, canonicalized form used as an index map key.
///
/// This is the only place where a whole path is Unicode-normalized; the
/// result is for lookups and is never written to any file.
#[must_use]
pub fn lookup_key(path: &str) -> String {
    let normalized: String = path.nfc().collect();
    let lowered = normalized.to_lowercase().replace('\\', "/");
    let stripped = strip_drive_prefix(&lowered, true);
    strip_volume_prefix(stripped, true).to_owned()
}

/// Unicode NFC normalization.
#[must_use]
pub fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// Unicode NFD normalization.
#[must_use]
pub fn nfd(s: &str) -> String {
    s.nfd().collect()
}

/// The path leaf after the last `/` or `\`, with no normalization.
#[must_use]
pub fn filename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// NFC-normalized, lowercased leaf — the dedup and rebinding key.
#[must_use]
pub fn nfc_lower_filename(path: &str) -> String {
    let leaf: String = filename(path).nfc().collect();
    leaf.to_lowercase()
}

/// True when two paths canonicalize to the same exact Unicode bytes.
#[must_use]
pub fn equivalent(a: &str, b: &str) -> bool {
    canonical(a) == canonical(b)
}

/// The host's track-size string: tenths of KB below one MB, tenths of MB
/// above. Used as the size half of dedup keys, so the formatting must match
/// the host byte for byte.
#[must_use]
pub fn format_track_size(bytes: u64) -> String {
    if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Strip a leading `X:/` drive prefix. When `lowercase_only` is set, only a
/// lowercase drive letter matches (the key form is already lowercased).
fn strip_drive_prefix(path: &str, lowercase_only: bool) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 3 && bytes[1] == b':' && bytes[2] == b'/' {
        let letter_ok = if lowercase_only {
            bytes[0].is_ascii_lowercase()
        } else {
            bytes[0].is_ascii_alphabetic()
        };
        if letter_ok {
            return &path[3..];
        }
    }
    path
}

/// Strip a leading `/Volumes/<name>/` prefix. The volume name must be
/// nonempty and followed by a slash.
fn strip_volume_prefix(path: &str, lowercase: bool) -> &str {
    let marker = if lowercase { "/volumes/" } else { "/Volumes/" };
    if let Some(rest) = path.strip_prefix(marker) {
        if let Some(idx) = rest.find('/') {
            if idx > 0 {
                return &rest[idx + 1..];
            }
        }
    }
    path
}
