//! In-place editing of file-backed archives.

use std::path::{Path, PathBuf};

use zipkit::{
    AccessMode, Archive, CancelToken, CompressionMethod, DateTime, EntryOptions, ZipError,
};

fn stored() -> EntryOptions {
    EntryOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::from_date_and_time(2018, 8, 15, 20, 45, 6).unwrap())
}

/// Build the `{dir/, dir/a, dir/b}` fixture at the given path.
fn write_fixture(path: &Path) {
    let mut archive = Archive::open_file(path, AccessMode::Create).unwrap();
    archive.add_directory("dir", &stored()).unwrap();
    archive
        .add_entry("dir/a", &stored(), &b"content of a"[..])
        .unwrap();
    archive
        .add_entry("dir/b", &stored(), &b"content of b"[..])
        .unwrap();
    archive.finish().unwrap();
}

fn temp_archive(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[test]
fn remove_compacts_following_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "fixture.zip");
    write_fixture(&path);

    let mut archive = Archive::open_file(&path, AccessMode::Update).unwrap();
    let removed_size = archive.by_name("dir/a").unwrap().local_size();
    let b_offset_before = archive.by_name("dir/b").unwrap().header_start();

    archive.remove_entry("dir/a").unwrap();

    let names: Vec<_> = archive.entries().map(|e| e.name().to_string()).collect();
    assert_eq!(names, ["dir/", "dir/b"]);
    let b_offset_after = archive.by_name("dir/b").unwrap().header_start();
    assert_eq!(b_offset_after, b_offset_before - removed_size);
    archive.finish().unwrap();

    // The rewritten archive must agree with what the catalog claimed.
    let mut reopened = Archive::open_file(&path, AccessMode::Read).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(
        reopened.by_name("dir/b").unwrap().header_start(),
        b_offset_after
    );
    let mut contents = Vec::new();
    reopened.extract("dir/b", &mut contents).unwrap();
    assert_eq!(contents, b"content of b");
    reopened.check_integrity().unwrap();
}

#[test]
fn update_mode_appends_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "append.zip");
    write_fixture(&path);

    let mut archive = Archive::open_file(&path, AccessMode::Update).unwrap();
    archive
        .add_entry("dir/c", &stored(), &b"content of c"[..])
        .unwrap();
    archive.finish().unwrap();

    let mut reopened = Archive::open_file(&path, AccessMode::Read).unwrap();
    assert_eq!(reopened.len(), 4);
    let mut contents = Vec::new();
    reopened.extract("dir/c", &mut contents).unwrap();
    assert_eq!(contents, b"content of c");
    let mut contents = Vec::new();
    reopened.extract("dir/a", &mut contents).unwrap();
    assert_eq!(contents, b"content of a");
}

#[test]
fn update_mode_overwrites_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "overwrite.zip");
    write_fixture(&path);

    let mut archive = Archive::open_file(&path, AccessMode::Update).unwrap();
    archive
        .add_entry("dir/a", &stored(), &b"replacement"[..])
        .unwrap();
    assert_eq!(archive.len(), 3);
    archive.finish().unwrap();

    let mut reopened = Archive::open_file(&path, AccessMode::Read).unwrap();
    assert_eq!(reopened.len(), 3);
    let mut contents = Vec::new();
    reopened.extract("dir/a", &mut contents).unwrap();
    assert_eq!(contents, b"replacement");
    reopened.check_integrity().unwrap();
}

#[test]
fn removing_every_entry_leaves_a_valid_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "empty.zip");
    write_fixture(&path);

    let mut archive = Archive::open_file(&path, AccessMode::Update).unwrap();
    archive.remove_entry("dir/a").unwrap();
    archive.remove_entry("dir/b").unwrap();
    archive.remove_entry("dir/").unwrap();
    assert!(archive.is_empty());
    archive.finish().unwrap();

    // Nothing but the footer remains.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 22);

    let mut archive = Archive::open_file(&path, AccessMode::Update).unwrap();
    archive
        .add_entry("fresh", &stored(), &b"fresh start"[..])
        .unwrap();
    archive.finish().unwrap();

    let mut reopened = Archive::open_file(&path, AccessMode::Read).unwrap();
    let mut contents = Vec::new();
    reopened.extract("fresh", &mut contents).unwrap();
    assert_eq!(contents, b"fresh start");
}

#[test]
fn create_refuses_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "exists.zip");
    write_fixture(&path);

    let err = Archive::open_file(&path, AccessMode::Create).unwrap_err();
    assert!(matches!(err, ZipError::UnwritableArchive(_)));
}

#[test]
fn update_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "missing.zip");
    let err = Archive::open_file(&path, AccessMode::Update).unwrap_err();
    assert!(matches!(err, ZipError::UnwritableFile(_)));
}

#[test]
fn remove_missing_entry_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "missing-entry.zip");
    write_fixture(&path);

    let mut archive = Archive::open_file(&path, AccessMode::Update).unwrap();
    let err = archive.remove_entry("dir/z").unwrap_err();
    assert!(matches!(err, ZipError::EntryNotFound));
}

#[test]
fn cancelled_remove_leaves_archive_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "cancelled.zip");
    write_fixture(&path);

    let mut archive = Archive::open_file(&path, AccessMode::Update).unwrap();
    let token = CancelToken::new();
    token.cancel();
    let err = archive
        .remove_entry_with("dir/a", 4096, &token)
        .unwrap_err();
    assert!(matches!(err, ZipError::Cancelled));
    drop(archive);

    // The on-disk directory was never rewritten, so the archive still scans.
    let mut reopened = Archive::open_file(&path, AccessMode::Read).unwrap();
    assert_eq!(reopened.len(), 3);
    reopened.check_integrity().unwrap();
}

#[test]
fn file_and_memory_backings_produce_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_archive(&dir, "twin.zip");

    let mut on_disk = Archive::open_file(&path, AccessMode::Create).unwrap();
    let mut in_memory = Archive::create_in_memory().unwrap();
    for archive in [&mut on_disk, &mut in_memory] {
        archive.add_directory("dir", &stored()).unwrap();
        archive
            .add_entry("dir/file", &stored(), &b"same bytes"[..])
            .unwrap();
        archive.remove_entry("dir/").unwrap();
    }
    on_disk.finish().unwrap();
    let memory_bytes = in_memory.finish().unwrap().into_bytes().unwrap();

    let disk_bytes = std::fs::read(&path).unwrap();
    assert_eq!(disk_bytes, memory_bytes);
}
