// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::HashMap;
use std::sync::Arc;

use tempfile::TempDir;

use super::super::os::OsFs;
use super::*;

async fn fixture() -> (TempDir, TempDir, MuxFs) {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let mut mounts: HashMap<String, SharedFs> = HashMap::new();
    mounts.insert(
        "alpha".to_owned(),
        Arc::new(OsFs::new(first.path()).unwrap()),
    );
    mounts.insert(
        "beta".to_owned(),
        Arc::new(OsFs::new(second.path()).unwrap()),
    );
    let mux = MuxFs::new(mounts);
    mux.write_file("vfs://alpha/data.txt", b"alpha data")
        .await
        .unwrap();
    (first, second, mux)
}

#[test]
fn test_split_vfs_path() {
    assert_eq!(split_vfs_path("vfs://a/b/c").unwrap(), ("a", "b/c"));
    assert_eq!(split_vfs_path("vfs://a/").unwrap(), ("a", ""));
    assert!(matches!(
        split_vfs_path("file:///a/b"),
        Err(Error::InvalidPath(_))
    ));
    assert!(matches!(split_vfs_path("vfs://"), Err(Error::InvalidPath(_))));
}

#[tokio::test]
async fn test_routes_by_name() {
    let (_a, _b, mux) = fixture().await;
    assert_eq!(
        mux.read_file("vfs://alpha/data.txt").await.unwrap(),
        b"alpha data"
    );
    assert!(mux
        .stat("vfs://beta/data.txt")
        .await
        .unwrap_err()
        .is_not_exist());
}

#[tokio::test]
async fn test_unknown_mount() {
    let (_a, _b, mux) = fixture().await;
    assert!(matches!(
        mux.stat("vfs://gamma/data.txt").await,
        Err(Error::NotConfigured(_))
    ));
}

#[tokio::test]
async fn test_malformed_path() {
    let (_a, _b, mux) = fixture().await;
    assert!(matches!(
        mux.stat("alpha/data.txt").await,
        Err(Error::InvalidPath(_))
    ));
}

#[tokio::test]
async fn test_rename_within_and_across_mounts() {
    let (_a, _b, mux) = fixture().await;
    mux.rename("vfs://alpha/data.txt", "vfs://alpha/renamed.txt")
        .await
        .unwrap();
    assert_eq!(
        mux.read_file("vfs://alpha/renamed.txt").await.unwrap(),
        b"alpha data"
    );

    assert!(matches!(
        mux.rename("vfs://alpha/renamed.txt", "vfs://beta/stolen.txt")
            .await,
        Err(Error::Invalid(_))
    ));
}

#[tokio::test]
async fn test_close_closes_all_mounts() {
    let (_a, _b, mux) = fixture().await;
    mux.close().await.unwrap();
}
