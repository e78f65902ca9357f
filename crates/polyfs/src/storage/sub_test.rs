// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::sync::Arc;

use tempfile::TempDir;

use super::super::os::OsFs;
use super::*;
use crate::fs::FileSystem as _;

async fn fixture() -> (TempDir, SubFs) {
    let tmpdir = tempfile::tempdir().expect("failed to create dir for test");
    let base: SharedFs = Arc::new(OsFs::new(tmpdir.path()).unwrap());
    base.write_file("scope/a/one.txt", b"one").await.unwrap();
    base.write_file("scope/two.txt", b"two").await.unwrap();
    base.write_file("outside.txt", b"secret").await.unwrap();
    let sub = SubFs::new(base, "scope").unwrap();
    (tmpdir, sub)
}

#[tokio::test]
async fn test_paths_are_prefixed() {
    let (_tmpdir, sub) = fixture().await;
    assert_eq!(sub.read_file("two.txt").await.unwrap(), b"two");
    assert_eq!(sub.read_file("a/one.txt").await.unwrap(), b"one");
    assert!(sub.stat("outside.txt").await.unwrap_err().is_not_exist());
    assert!(sub.read_file("../outside.txt").await.is_err());
}

#[tokio::test]
async fn test_write_through() {
    let (tmpdir, sub) = fixture().await;
    sub.write_file("b/new.txt", b"fresh").await.unwrap();
    let on_disk = tokio::fs::read(tmpdir.path().join("scope/b/new.txt"))
        .await
        .unwrap();
    assert_eq!(on_disk, b"fresh");

    sub.rename("b/new.txt", "b/renamed.txt").await.unwrap();
    sub.remove("b/renamed.txt").await.unwrap();
    assert!(sub.stat("b/renamed.txt").await.unwrap_err().is_not_exist());
}

#[tokio::test]
async fn test_walk_strips_the_prefix() {
    let (_tmpdir, sub) = fixture().await;
    let mut seen = Vec::new();
    sub.walk_dir("", &mut |path, _entry| {
        seen.push(path.to_owned());
        Ok(())
    })
    .await
    .unwrap();
    seen.sort();
    assert_eq!(seen, ["a", "a/one.txt", "two.txt"]);
}

#[tokio::test]
async fn test_nested_sub() {
    let (_tmpdir, sub) = fixture().await;
    let deeper = sub.sub("a").unwrap();
    assert_eq!(deeper.read_file("one.txt").await.unwrap(), b"one");
}
