// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use chrono::Utc;
use tempfile::TempDir;

use super::super::os::OsFs;
use super::*;
use crate::fs::read_all;
use crate::zipstream::{CompressionMethod, ZipWriter};

async fn write_archive(base: &OsFs, name: &str, entries: &[(&str, &[u8])]) {
    let sink = base.create(name).await.unwrap();
    let mut writer = ZipWriter::new(sink);
    for (entry_name, data) in entries {
        writer
            .begin_entry(entry_name, Utc::now(), 0o644, CompressionMethod::Deflated)
            .await
            .unwrap();
        writer.write_entry_data(data).await.unwrap();
    }
    writer.finish().await.unwrap();
    writer.close_sink().await.unwrap();
}

async fn fixture(capacity: usize) -> (TempDir, ZipFolderFs) {
    let tmpdir = tempfile::tempdir().unwrap();
    let base = OsFs::new(tmpdir.path()).unwrap();
    write_archive(&base, "outer.zip", &[("inner/data.bin", &[0xab_u8; 64])]).await;
    base.write_file("plain.txt", b"plain").await.unwrap();
    let fs = ZipFolderFs::new(Arc::new(base), capacity).unwrap();
    (tmpdir, fs)
}

#[tokio::test]
async fn test_archive_traversal() {
    let (_tmpdir, fs) = fixture(20).await;

    let mut fp = fs.open("outer.zip/inner/data.bin").await.unwrap();
    let data = read_all(fp.as_mut()).await.unwrap();
    fp.close().await.unwrap();
    assert_eq!(data, vec![0xab_u8; 64]);

    let names: Vec<String> = fs
        .read_dir("outer.zip/inner")
        .await
        .unwrap()
        .iter()
        .map(|e| e.name().to_owned())
        .collect();
    assert_eq!(names, ["data.bin"]);

    let root: Vec<(String, bool)> = fs
        .read_dir("")
        .await
        .unwrap()
        .iter()
        .map(|e| (e.name().to_owned(), e.is_dir()))
        .collect();
    assert!(root.contains(&("outer.zip".to_owned(), true)));
    assert!(root.contains(&("plain.txt".to_owned(), false)));
}

#[tokio::test]
async fn test_inner_stat() {
    let (_tmpdir, fs) = fixture(20).await;
    let info = fs.stat("outer.zip/inner/data.bin").await.unwrap();
    assert_eq!(info.size, 64);
    assert!(!info.is_dir);
    assert!(fs.stat("outer.zip/inner").await.unwrap().is_dir);
    assert!(fs.stat("outer.zip").await.unwrap().is_dir);
    assert!(fs
        .stat("outer.zip/missing")
        .await
        .unwrap_err()
        .is_not_exist());
}

#[tokio::test]
async fn test_passthrough_outside_archives() {
    let (_tmpdir, fs) = fixture(20).await;
    assert_eq!(fs.read_file("plain.txt").await.unwrap(), b"plain");
    fs.write_file("written.txt", b"ok").await.unwrap();
    assert_eq!(fs.read_file("written.txt").await.unwrap(), b"ok");
    fs.rename("written.txt", "moved.txt").await.unwrap();
    fs.remove("moved.txt").await.unwrap();
}

#[tokio::test]
async fn test_writes_inside_archives_are_refused() {
    let (_tmpdir, fs) = fixture(20).await;
    assert!(matches!(
        fs.create("outer.zip/new.txt").await.err(),
        Some(Error::Invalid(_))
    ));
    assert!(matches!(
        fs.mkdir("outer.zip/newdir").await.err(),
        Some(Error::Invalid(_))
    ));
    assert!(matches!(
        fs.remove("outer.zip/inner/data.bin").await.err(),
        Some(Error::Invalid(_))
    ));
}

#[tokio::test]
async fn test_capacity_is_bounded() {
    let (tmpdir, fs) = fixture(2).await;
    let base = OsFs::new(tmpdir.path()).unwrap();
    write_archive(&base, "a.zip", &[("a.txt", b"a")]).await;
    write_archive(&base, "b.zip", &[("b.txt", b"b")]).await;
    write_archive(&base, "c.zip", &[("c.txt", b"c")]).await;

    for name in ["a.zip/a.txt", "b.zip/b.txt", "c.zip/c.txt"] {
        fs.read_file(name).await.unwrap();
        assert!(fs.cached_count() <= 2);
    }
    // the busiest archives stay resident
    fs.read_file("c.zip/c.txt").await.unwrap();
    assert!(fs.cached_count() <= 2);
}

#[tokio::test]
async fn test_full_cache_of_locked_archives_refuses() {
    let (tmpdir, fs) = fixture(1).await;
    let base = OsFs::new(tmpdir.path()).unwrap();
    write_archive(&base, "busy.zip", &[("busy.txt", b"busy")]).await;

    let fp = fs.open("busy.zip/busy.txt").await.unwrap();
    assert!(fs.is_locked());

    // the only resident archive is locked, so a new one is refused
    let err = fs.read_file("outer.zip/inner/data.bin").await.unwrap_err();
    assert!(matches!(err, Error::ArchiveCacheFull(_)));

    // the locked archive must still be readable afterwards
    let mut fp = fp;
    assert_eq!(read_all(fp.as_mut()).await.unwrap(), b"busy");
    fp.close().await.unwrap();

    // an unlock makes room again
    fs.read_file("outer.zip/inner/data.bin").await.unwrap();
}

#[tokio::test]
async fn test_clear_unlocked_keeps_busy_archives() {
    let (tmpdir, fs) = fixture(5).await;
    let base = OsFs::new(tmpdir.path()).unwrap();
    write_archive(&base, "busy.zip", &[("busy.txt", b"busy")]).await;

    fs.read_file("outer.zip/inner/data.bin").await.unwrap();
    let mut fp = fs.open("busy.zip/busy.txt").await.unwrap();
    assert_eq!(fs.cached_count(), 2);

    fs.clear_unlocked().await.unwrap();
    assert_eq!(fs.cached_count(), 1, "only the idle archive is reaped");

    assert_eq!(read_all(fp.as_mut()).await.unwrap(), b"busy");
    fp.close().await.unwrap();
}

#[tokio::test]
async fn test_close_purges_and_stops() {
    let (_tmpdir, fs) = fixture(3).await;
    fs.read_file("outer.zip/inner/data.bin").await.unwrap();
    fs.close().await.unwrap();
    assert_eq!(fs.cached_count(), 0);
}
