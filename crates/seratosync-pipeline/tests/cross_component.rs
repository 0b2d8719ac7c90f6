//! Cross-component tests for the sync pipeline.
//!
//! These verify interactions between the format crate and the pipeline —
//! not individual components in isolation (those have inline `#[cfg(test)]`
//! modules). The focus is on:
//!
//! 1. Crate round-trip → smart write → mtime stability
//! 2. Full orchestrator run → hierarchical crate naming on disk
//! 3. Broken-path fixing threading crate rewrites into index repair
//! 4. Duplicate move → index repair → rescan consistency
//! 5. Session repair against a scanned media tree

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use seratosync_format::bytes::{utf16be_bytes, ByteWriter};
use seratosync_format::{CrateFile, LibraryIndex, SessionFile};
use seratosync_pipeline::{
    session_maintenance, DedupMode, DupeDetection, DupeMovePolicy, NullReporter, Orchestrator,
    SyncConfig,
};

// ═══════════════════════════════════════════════════════════════════════════
// Test helpers
// ═══════════════════════════════════════════════════════════════════════════

/// A volume holding `Music/` and `_Serato_/`, the host's usual layout.
struct Volume {
    _dir: tempfile::TempDir,
    root: PathBuf,
    music: PathBuf,
    library: PathBuf,
}

fn volume() -> Volume {
    let dir = tempfile::tempdir().expect("create temp volume");
    let root = dir.path().to_owned();
    let music = root.join("Music");
    let library = root.join("_Serato_");
    fs::create_dir_all(&music).expect("create music root");
    fs::create_dir_all(library.join("Subcrates")).expect("create library");
    Volume {
        _dir: dir,
        root,
        music,
        library,
    }
}

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parents");
    }
    fs::write(path, b"media-bytes").expect("write file");
}

fn config_for(volume: &Volume) -> SyncConfig {
    SyncConfig {
        music_root: volume.music.clone(),
        library: volume.library.clone(),
        parent_crate: Some("Current".into()),
        backup: false,
        dedup_mode: DedupMode::Filename,
        ..SyncConfig::default()
    }
}

fn run(config: SyncConfig) -> seratosync_pipeline::SyncSummary {
    Orchestrator::with_reporter(config, Arc::new(NullReporter))
        .expect("build orchestrator")
        .run()
        .expect("run sync")
}

/// Minimal `database V2` bytes with one track record per path.
fn index_bytes(paths: &[&str]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_ascii("vrsn");
    w.write_u8(0);
    w.write_u8(0);
    let version = utf16be_bytes("2.0/Serato Scratch LIVE Database");
    w.write_uint(version.len() as u64, 2);
    w.write_bytes(&version);
    for p in paths {
        let mut record = ByteWriter::new();
        let pb = utf16be_bytes(p);
        record.write_ascii("pfil");
        record.write_u32(pb.len() as u32);
        record.write_bytes(&pb);
        let record = record.into_bytes();
        w.write_ascii("otrk");
        w.write_u32(record.len() as u32);
        w.write_bytes(&record);
    }
    w.into_bytes()
}

fn all_crate_tracks(library: &Path) -> Vec<String> {
    let mut tracks = Vec::new();
    for entry in fs::read_dir(library.join("Subcrates")).expect("read Subcrates") {
        let path = entry.expect("entry").path();
        if path.extension().is_some_and(|ext| ext == "crate") {
            let crate_file = CrateFile::read_from(&path).expect("parse crate");
            tracks.extend(crate_file.tracks().iter().cloned());
        }
    }
    tracks
}

// ═══════════════════════════════════════════════════════════════════════════
// 1. Crate round-trip → smart write → mtime stability
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn repeated_sync_leaves_crate_mtimes_alone() {
    let vol = volume();
    touch(&vol.music.join("Genre/a.mp3"));

    run(config_for(&vol));
    let crate_path = vol.library.join("Subcrates/Current%%Genre.crate");
    assert!(crate_path.exists());

    // Pin an old mtime so any rewrite would be visible.
    filetime::set_file_mtime(&crate_path, filetime::FileTime::from_unix_time(1_000_000, 0))
        .expect("set mtime");
    let pinned = fs::metadata(&crate_path).expect("stat").modified().expect("mtime");

    let summary = run(config_for(&vol));
    assert_eq!(summary.crates_updated, 0);
    let after = fs::metadata(&crate_path).expect("stat").modified().expect("mtime");
    assert_eq!(pinned, after, "unchanged crate must keep its mtime");
}

#[test]
fn on_disk_crate_parses_back_to_the_written_form() {
    let vol = volume();
    touch(&vol.music.join("Genre/b.mp3"));
    touch(&vol.music.join("Genre/a.mp3"));

    run(config_for(&vol));

    let parsed =
        CrateFile::read_from(&vol.library.join("Subcrates/Current%%Genre.crate")).expect("parse");
    assert_eq!(parsed.version(), "81.0");
    assert_eq!(parsed.sort_key(), "song");
    assert_eq!(parsed.sort_revision(), 256);
    assert_eq!(parsed.track_count(), 2);
    // Scanner emits codepoint order, the codec preserves it.
    assert!(parsed.tracks()[0].ends_with("a.mp3"));
    assert!(parsed.tracks()[1].ends_with("b.mp3"));
}

// ═══════════════════════════════════════════════════════════════════════════
// 2. Hierarchical naming on disk
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn nested_directories_become_delimited_crate_files() {
    let vol = volume();
    touch(&vol.music.join("Genre/House/deep.mp3"));

    run(config_for(&vol));

    let subcrates = vol.library.join("Subcrates");
    assert!(subcrates.join("Current.crate").exists());
    assert!(subcrates.join("Current%%Genre.crate").exists());
    assert!(subcrates.join("Current%%Genre%%House.crate").exists());

    // Only the deepest crate holds the track; nothing propagates upward.
    let genre = CrateFile::read_from(&subcrates.join("Current%%Genre.crate")).expect("parse");
    assert_eq!(genre.track_count(), 0);
    let house =
        CrateFile::read_from(&subcrates.join("Current%%Genre%%House.crate")).expect("parse");
    assert_eq!(house.track_count(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// 3. Crate fixer → index repair
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn fixer_rebinds_stale_crate_and_index_together() {
    let vol = volume();
    touch(&vol.music.join("House/deep.mp3"));

    // A legacy crate and the index both remember a location that is gone.
    let mut legacy = CrateFile::new();
    legacy.add_track("Music/OldPlace/deep.mp3");
    legacy
        .write_to(&vol.library.join("Subcrates/Legacy.crate"))
        .expect("write legacy crate");
    fs::write(
        vol.library.join("database V2"),
        index_bytes(&["Music/OldPlace/deep.mp3"]),
    )
    .expect("write index");

    let mut config = config_for(&vol);
    config.fix_broken_paths = true;
    let summary = run(config);

    assert_eq!(summary.index_paths_fixed, 1);
    assert!(summary.crates_repaired >= 1);

    let fixed = CrateFile::read_from(&vol.library.join("Subcrates/Legacy.crate")).expect("parse");
    assert_eq!(fixed.tracks(), ["Music/House/deep.mp3"]);

    let index = LibraryIndex::read_from(&vol.library.join("database V2")).expect("parse index");
    let stored = index
        .original_path_by_filename("deep.mp3")
        .expect("track still indexed");
    assert_eq!(stored, "Music/House/deep.mp3");
}

// ═══════════════════════════════════════════════════════════════════════════
// 4. Duplicate move → rescan consistency
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn crates_never_reference_moved_duplicates() {
    let vol = volume();
    let old_copy = vol.music.join("Genre/track.mp3");
    let new_copy = vol.music.join("Other/track.mp3");
    touch(&old_copy);
    touch(&new_copy);
    filetime::set_file_mtime(&old_copy, filetime::FileTime::from_unix_time(1_600_000_000, 0))
        .expect("set mtime");
    filetime::set_file_mtime(&new_copy, filetime::FileTime::from_unix_time(1_700_000_000, 0))
        .expect("set mtime");

    let mut config = config_for(&vol);
    config.dupe_scan = true;
    config.dupe_detection = DupeDetection::NameAndSize;
    config.dupe_move = DupeMovePolicy::KeepNewest;
    let summary = run(config);

    assert_eq!(summary.duplicates_moved, 1);
    assert!(!old_copy.exists(), "older duplicate was quarantined");
    assert!(new_copy.exists(), "newest duplicate stays in place");

    // The quarantine preserves the tree relative to the music root.
    let quarantined: Vec<_> = walk_files(&vol.root.join("seratosync/dupes"));
    assert!(
        quarantined
            .iter()
            .any(|p| p.ends_with(Path::new("Genre/track.mp3"))),
        "got {quarantined:?}"
    );

    // No crate written after the rescan references the moved copy.
    for track in all_crate_tracks(&vol.library) {
        assert!(
            !track.contains("Genre/track.mp3"),
            "crate still references moved file: {track}"
        );
    }
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(root) else {
        return files;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}

// ═══════════════════════════════════════════════════════════════════════════
// 5. Session repair against a scanned media tree
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn session_paths_follow_the_media_tree() {
    let vol = volume();
    touch(&vol.music.join("New/moved.mp3"));
    fs::create_dir_all(vol.library.join("History/Sessions")).expect("sessions dir");

    // Session entry with trailing NUL padding pointing at a dead path.
    let dead = "/old/place/moved.mp3\u{0}\u{0}";
    let mut w = ByteWriter::new();
    w.write_ascii("vrsn");
    let version = utf16be_bytes("1.0/Serato Scratch LIVE Review");
    w.write_u32(version.len() as u32);
    w.write_bytes(&version);
    let mut adat = ByteWriter::new();
    let pb = utf16be_bytes(dead);
    adat.write_u32(0x02);
    adat.write_u32(pb.len() as u32);
    adat.write_bytes(&pb);
    let adat = adat.into_bytes();
    let mut entry = ByteWriter::new();
    entry.write_ascii("adat");
    entry.write_u32(adat.len() as u32);
    entry.write_bytes(&adat);
    let entry = entry.into_bytes();
    w.write_ascii("oent");
    w.write_u32(entry.len() as u32);
    w.write_bytes(&entry);
    let session_path = vol.library.join("History/Sessions/night.session");
    fs::write(&session_path, w.into_bytes()).expect("write session");

    let media = seratosync_pipeline::scanner::scan(&vol.music);
    let report =
        session_maintenance::fix_broken_paths(&vol.library, &[&media], None, &NullReporter)
            .expect("fix sessions");
    assert_eq!(report.sessions_rewritten, 1);

    let reparsed = SessionFile::read_from(&session_path).expect("parse session");
    let fixed = reparsed.entries()[0].file_path.clone().expect("path");
    assert!(
        fixed.ends_with("Music/New/moved.mp3\u{0}\u{0}"),
        "trailing NULs preserved and path rebound: {fixed:?}"
    );
}
