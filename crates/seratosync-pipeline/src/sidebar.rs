//! Sidebar-order manifest (`neworder.pref`).
//!
//! The host shows crates in the order listed by this file. Regenerating it
//! with the names sorted gives an alphabetical sidebar. The format is plain
//! UTF-16BE text without BOM:
//!
//! ```text
//! [begin record]
//! [crate]<name>        (one line per crate, sorted)
//! [end record]
//! ```

use std::path::Path;

use seratosync_format::bytes::utf16be_bytes;

use crate::error::SyncResult;
use crate::report::SyncReporter;

const PREF_FILE: &str = "neworder.pref";
const BEGIN_MARKER: &str = "[begin record]";
const END_MARKER: &str = "[end record]";
const CRATE_MARKER: &str = "[crate]";
const CRATE_EXTENSION: &str = ".crate";

/// Rebuild `neworder.pref` from the crate files on disk, sorted. Returns
/// the number of crates listed.
///
/// # Errors
///
/// Propagates deletion and write failures; a manifest the host cannot trust
/// is worse than a missing one.
pub fn write_sidebar_order(library: &Path, reporter: &dyn SyncReporter) -> SyncResult<usize> {
    let pref_file = library.join(PREF_FILE);
    if pref_file.exists() {
        std::fs::remove_file(&pref_file)?;
    }

    let mut names = crate_names(library);
    if names.is_empty() {
        reporter.info("No crates found, skipping sidebar ordering");
        return Ok(0);
    }
    names.sort();

    let mut content = String::new();
    content.push_str(BEGIN_MARKER);
    content.push('\n');
    for name in &names {
        content.push_str(CRATE_MARKER);
        content.push_str(name);
        content.push('\n');
    }
    content.push_str(END_MARKER);
    content.push('\n');

    std::fs::write(&pref_file, utf16be_bytes(&content))?;
    reporter.info(&format!(
        "Wrote {PREF_FILE} with {} crates sorted alphabetically",
        names.len()
    ));
    Ok(names.len())
}

/// Crate names (file names minus extension) under `Subcrates`.
fn crate_names(library: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(library.join("Subcrates")) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.strip_suffix(CRATE_EXTENSION).map(str::to_owned))
        .collect()
}
