//! Binary codecs for the Serato library formats.
//!
//! This crate implements the three interlocking tag-length-value formats the
//! host DJ application keeps on disk — the main library index
//! (`database V2`), the crate container (`*.crate`), and the session history
//! record (`*.session` plus `history.database`) — along with the
//! path-identity layer they all depend on (canonical forms, NFC/NFD
//! handling, volume-root relativization) and the in-place index repair
//! writer.
//!
//! All formats are big-endian with UTF-16BE strings and no BOM. Path bytes
//! are preserved exactly on round-trip unless explicitly rewritten through
//! [`index_repair`]; Unicode normalization happens only in lookup keys,
//! never in stored payloads.
//!
//! It has minimal external dependencies and is intended to be depended on by
//! the sync pipeline crate.

pub mod bytes;
pub mod crate_file;
pub mod error;
pub mod index_repair;
pub mod library_index;
pub mod path;
pub mod session;

pub use crate_file::CrateFile;
pub use error::{FormatError, FormatResult};
pub use index_repair::{apply_path_fixes, repair_index_file, PathFix, RepairOutcome};
pub use library_index::LibraryIndex;
pub use session::{scrub_history_database, ScrubOutcome, SessionEntry, SessionFile};
