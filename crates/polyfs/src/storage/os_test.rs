// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::fs::read_exact_at;

fn tmpfs() -> (TempDir, OsFs) {
    let tmpdir = tempfile::tempdir().expect("failed to create dir for test");
    let fs = OsFs::new(tmpdir.path()).unwrap();
    (tmpdir, fs)
}

#[rstest]
#[tokio::test]
async fn test_per_letter_round_trip() {
    let (_tmpdir, fs) = tmpfs();
    for letter in b'a'..=b'w' {
        let name = format!("{}/content.txt", letter as char);
        let payload = vec![letter; 1000];
        fs.write_file(&name, &payload).await.unwrap();
    }
    for letter in b'a'..=b'w' {
        let name = format!("{}/content.txt", letter as char);
        let info = fs.stat(&name).await.unwrap();
        assert_eq!(info.size, 1000);
        assert!(!info.is_dir);
        let data = fs.read_file(&name).await.unwrap();
        assert!(data.iter().all(|b| *b == letter));
    }
}

#[rstest]
#[tokio::test]
async fn test_stat_missing_is_not_exist() {
    let (_tmpdir, fs) = tmpfs();
    let err = fs.stat("no/such/file").await.unwrap_err();
    assert!(err.is_not_exist());
    let err = fs.open("no/such/file").await.unwrap_err();
    assert!(err.is_not_exist());
}

#[rstest]
#[tokio::test]
async fn test_create_makes_parents() {
    let (_tmpdir, fs) = tmpfs();
    let mut fp = fs.create("deep/ly/nested/file.txt").await.unwrap();
    fp.write_all(b"content").await.unwrap();
    fp.close().await.unwrap();
    assert_eq!(fs.read_file("deep/ly/nested/file.txt").await.unwrap(), b"content");
    assert!(fs.stat("deep/ly").await.unwrap().is_dir);
}

#[rstest]
#[tokio::test]
async fn test_read_dir_lists_created_entries() {
    let (_tmpdir, fs) = tmpfs();
    fs.write_file("dir/a.txt", b"a").await.unwrap();
    fs.write_file("dir/b.txt", b"b").await.unwrap();
    fs.mkdir("dir/child").await.unwrap();

    let mut names: Vec<String> = fs
        .read_dir("dir")
        .await
        .unwrap()
        .iter()
        .map(|e| e.name().to_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["a.txt", "b.txt", "child"]);
}

#[rstest]
#[tokio::test]
async fn test_rename_and_remove() {
    let (_tmpdir, fs) = tmpfs();
    fs.write_file("one.txt", b"1").await.unwrap();
    fs.rename("one.txt", "two.txt").await.unwrap();
    assert!(fs.stat("one.txt").await.unwrap_err().is_not_exist());
    assert_eq!(fs.read_file("two.txt").await.unwrap(), b"1");

    fs.remove("two.txt").await.unwrap();
    assert!(fs.stat("two.txt").await.unwrap_err().is_not_exist());
    assert!(fs.remove("two.txt").await.unwrap_err().is_not_exist());
}

#[rstest]
#[tokio::test]
async fn test_mkdir_existing_fails() {
    let (_tmpdir, fs) = tmpfs();
    fs.mkdir("dir").await.unwrap();
    assert!(matches!(fs.mkdir("dir").await, Err(Error::Exists(_))));
}

#[rstest]
#[tokio::test]
async fn test_sub_never_escapes_root() {
    let (_tmpdir, fs) = tmpfs();
    fs.write_file("inner/file.txt", b"inner").await.unwrap();
    let sub = fs.sub("inner").unwrap();
    assert_eq!(sub.read_file("file.txt").await.unwrap(), b"inner");
    assert!(sub.open("../file.txt").await.is_err());
}

#[rstest]
#[tokio::test]
async fn test_full_path() {
    let (tmpdir, fs) = tmpfs();
    let full = fs.full_path("a/b.txt").unwrap();
    assert!(full.starts_with(&tmpdir.path().to_string_lossy().replace('\\', "/")));
    assert!(full.ends_with("a/b.txt"));
}

#[rstest]
#[tokio::test]
async fn test_open_files_support_positioned_reads() {
    let (_tmpdir, fs) = tmpfs();
    fs.write_file("data.bin", &(0u8..=255).collect::<Vec<_>>())
        .await
        .unwrap();
    let fp = fs.open("data.bin").await.unwrap();
    let ra = match fp.random_access() {
        crate::fs::MaybeRandomAccess::Random(ra) => ra,
        crate::fs::MaybeRandomAccess::Sequential(_) => panic!("os files must be positioned"),
    };
    let mut buf = [0u8; 4];
    read_exact_at(ra.as_ref(), 100, &mut buf).await.unwrap();
    assert_eq!(buf, [100, 101, 102, 103]);
    ra.close().await.unwrap();
}
