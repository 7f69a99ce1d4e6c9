#![forbid(unsafe_code)]
//! End-to-end scenarios over the operation surface.

use wfs_core::{FileKind, Volume};
use wfs_core::scan::{RecordIter, latest};
use wfs_error::WfsError;
use wfs_image::Image;
use wfs_types::{DISK_SIZE, InodeNumber, SUPERBLOCK_SIZE};

fn record_count_for(vol: &Volume, ino: InodeNumber) -> usize {
    RecordIter::new(vol.image())
        .map(|view| view.expect("scan"))
        .filter(|view| view.header.inode_number == ino)
        .count()
}

#[test]
fn mkdir_appends_three_records_and_lists() {
    let mut vol = Volume::in_memory();
    vol.mkdir("/a", 0o755, 0, 0).expect("mkdir /a");

    let records: Vec<_> = RecordIter::new(vol.image())
        .collect::<wfs_error::Result<Vec<_>>>()
        .expect("scan");
    // Root from mkfs, the new directory, the re-appended root.
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].header.inode_number, InodeNumber::ROOT);
    assert_eq!(records[1].header.inode_number, InodeNumber(1));
    assert_eq!(records[2].header.inode_number, InodeNumber::ROOT);

    let names: Vec<String> = vol
        .readdir("/")
        .expect("readdir")
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a".to_owned()]);
}

#[test]
fn write_then_read_round_trips() {
    let mut vol = Volume::in_memory();
    vol.mknod("/f", 0o644, 1000, 1000).expect("mknod /f");
    let ino = vol.getattr("/f").expect("getattr").ino;

    assert_eq!(vol.write("/f", 0, b"hello").expect("first write"), 5);
    assert_eq!(vol.write("/f", 5, b"!").expect("second write"), 1);
    assert_eq!(vol.read("/f", 0, 6).expect("read"), b"hello!");

    // Create plus two writes: three records for the file's inode.
    assert_eq!(record_count_for(&vol, ino), 3);
}

#[test]
fn unlink_leaves_a_tombstone() {
    let mut vol = Volume::in_memory();
    vol.mknod("/f", 0o644, 0, 0).expect("mknod /f");
    let ino = vol.getattr("/f").expect("getattr").ino;

    vol.unlink("/f").expect("unlink");

    assert!(matches!(vol.getattr("/f"), Err(WfsError::NotFound(_))));
    let last = latest(vol.image(), ino).expect("scan").expect("tombstone");
    assert!(last.header.deleted);
}

#[test]
fn enospc_preserves_head_and_content() {
    let mut vol = Volume::in_memory();
    vol.mknod("/f", 0o644, 0, 0).expect("mknod /f");
    vol.write("/f", 0, b"precious").expect("seed");

    // Grow the file until the next doubling write cannot fit.
    let mut chunk = vec![0x5A_u8; 64 * 1024];
    loop {
        let size = vol.getattr("/f").expect("getattr").size;
        match vol.write("/f", size, &chunk) {
            Ok(_) => continue,
            Err(WfsError::NoSpace) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let head_before = vol.image().head();
    let content_before = vol.read("/f", 0, 8).expect("read before");
    let size = vol.getattr("/f").expect("getattr").size;

    chunk.resize(DISK_SIZE, 0x5A);
    assert!(matches!(
        vol.write("/f", size, &chunk),
        Err(WfsError::NoSpace)
    ));
    assert_eq!(vol.image().head(), head_before);
    assert_eq!(vol.read("/f", 0, 8).expect("read after"), content_before);
    assert_eq!(&content_before, b"precious");
}

#[test]
fn rmdir_refuses_populated_directory() {
    let mut vol = Volume::in_memory();
    vol.mkdir("/a", 0o755, 0, 0).expect("mkdir /a");
    vol.mkdir("/a/b", 0o755, 0, 0).expect("mkdir /a/b");

    assert!(matches!(vol.rmdir("/a"), Err(WfsError::NotEmpty)));
    vol.rmdir("/a/b").expect("rmdir /a/b");
    vol.rmdir("/a").expect("rmdir /a");
    assert!(vol.readdir("/").expect("readdir").is_empty());
}

#[test]
fn compaction_preserves_semantics() {
    let mut vol = Volume::in_memory();
    vol.mknod("/f", 0o644, 0, 0).expect("mknod /f");
    vol.write("/f", 0, b"hello").expect("write");
    vol.write("/f", 5, b"!").expect("write");
    vol.mkdir("/d", 0o755, 0, 0).expect("mkdir /d");
    vol.mknod("/d/g", 0o644, 0, 0).expect("mknod /d/g");

    let names_before: Vec<String> = vol
        .readdir("/")
        .expect("readdir")
        .into_iter()
        .map(|e| e.name)
        .collect();
    let head_before = vol.image().head();

    vol.compact().expect("compact");

    assert_eq!(vol.image().bytes().len(), DISK_SIZE);
    assert!(vol.image().head() < head_before);
    assert_eq!(vol.read("/f", 0, 6).expect("read"), b"hello!");
    let names_after: Vec<String> = vol
        .readdir("/")
        .expect("readdir")
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names_before, names_after);

    // One record per live inode, ascending.
    let inos: Vec<u32> = RecordIter::new(vol.image())
        .map(|view| view.expect("scan").header.inode_number.0)
        .collect();
    let mut expected = inos.clone();
    expected.sort_unstable();
    expected.dedup();
    assert_eq!(inos, expected);
}

#[test]
fn create_then_resolve_reports_file_mode() {
    let mut vol = Volume::in_memory();
    vol.mkdir("/a", 0o755, 0, 0).expect("mkdir /a");
    vol.mkdir("/a/b", 0o755, 0, 0).expect("mkdir /a/b");
    let ino = vol.mknod("/a/b/c", 0o600, 7, 8).expect("mknod /a/b/c");

    let attr = vol.getattr("/a/b/c").expect("getattr");
    assert_eq!(attr.ino, ino);
    assert_eq!(attr.kind, FileKind::RegularFile);
    assert_eq!(attr.perm, 0o600);
    assert_eq!(attr.uid, 7);
    assert_eq!(attr.gid, 8);
}

#[test]
fn log_span_matches_head_after_random_workload() {
    let mut vol = Volume::in_memory();
    vol.mkdir("/d", 0o755, 0, 0).expect("mkdir");
    for i in 0..8 {
        let path = format!("/d/file-{i}");
        vol.mknod(&path, 0o644, 0, 0).expect("mknod");
        vol.write(&path, 0, format!("payload {i}").as_bytes())
            .expect("write");
    }
    vol.unlink("/d/file-3").expect("unlink");
    vol.unlink("/d/file-5").expect("unlink");

    let total: usize = RecordIter::new(vol.image())
        .map(|view| view.expect("scan").header.total_len())
        .sum();
    assert_eq!(total + SUPERBLOCK_SIZE, vol.image().head() as usize);
}

#[test]
fn mutations_persist_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wfs.img");

    {
        let image = Image::create(&path).expect("create");
        let mut vol = Volume::from_image(image);
        vol.mkdir("/home", 0o755, 0, 0).expect("mkdir");
        vol.mknod("/home/note", 0o644, 1000, 1000).expect("mknod");
        vol.write("/home/note", 0, b"remember me").expect("write");
    }

    let mut vol = Volume::open(&path).expect("reopen");
    assert_eq!(vol.read("/home/note", 0, 32).expect("read"), b"remember me");

    vol.compact().expect("compact");
    drop(vol);

    let vol = Volume::open(&path).expect("reopen after compaction");
    assert_eq!(vol.read("/home/note", 0, 32).expect("read"), b"remember me");
}
