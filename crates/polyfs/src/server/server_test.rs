// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::time::Duration;

use jsonwebtoken::Algorithm;
use tempfile::TempDir;

use super::*;
use crate::fs::{read_all, FileSystem};
use crate::storage::{MuxFs, OsFs, RemoteFs};
use crate::storage::remote::RemoteOptions;

async fn start_server() -> (TempDir, String) {
    let tmpdir = tempfile::tempdir().unwrap();
    let mut mounts: HashMap<String, SharedFs> = HashMap::new();
    mounts.insert(
        "data".to_owned(),
        Arc::new(OsFs::new(tmpdir.path()).unwrap()),
    );
    let mux: SharedFs = Arc::new(MuxFs::new(mounts));
    let server = Arc::new(VfsServer::new(
        mux,
        AuthMode::Jwt {
            algorithms: vec![Algorithm::HS256],
            keys: HashMap::from([("data".to_owned(), "secret".to_owned())]),
        },
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = serve(listener, server).await;
    });
    (tmpdir, address)
}

fn client(address: &str, token: Option<String>) -> RemoteFs {
    RemoteFs::connect(RemoteOptions {
        address: address.to_owned(),
        vfs: "data".to_owned(),
        base_dir: String::new(),
        token,
        timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    })
    .unwrap()
}

fn token() -> String {
    mint_token("secret", "data", Algorithm::HS256, Duration::from_secs(300)).unwrap()
}

#[tokio::test]
async fn test_round_trip_over_http() {
    let (_tmpdir, address) = start_server().await;
    let remote = client(&address, Some(token()));

    // create streams the body through the pipe
    let mut fp = remote.create("docs/hello.txt").await.unwrap();
    fp.write_all(b"hello ").await.unwrap();
    fp.write_all(b"remote world").await.unwrap();
    fp.close().await.unwrap();

    let info = remote.stat("docs/hello.txt").await.unwrap();
    assert_eq!(info.name, "hello.txt");
    assert_eq!(info.size, 18);
    assert!(!info.is_dir);

    let mut fp = remote.open("docs/hello.txt").await.unwrap();
    assert_eq!(read_all(fp.as_mut()).await.unwrap(), b"hello remote world");
    assert_eq!(fp.stat().await.unwrap().size, 18);
    fp.close().await.unwrap();
}

#[tokio::test]
async fn test_create_refuses_overwrite() {
    let (_tmpdir, address) = start_server().await;
    let remote = client(&address, Some(token()));

    remote.write_file("once.txt", b"first").await.unwrap();
    let mut fp = remote.create("once.txt").await.unwrap();
    let err = fp.close().await.unwrap_err();
    assert!(matches!(err, Error::Exists(_)), "got {err}");
}

#[tokio::test]
async fn test_remove_and_missing_paths() {
    let (_tmpdir, address) = start_server().await;
    let remote = client(&address, Some(token()));

    remote.write_file("gone.txt", b"data").await.unwrap();
    remote.remove("gone.txt").await.unwrap();
    assert!(remote.stat("gone.txt").await.unwrap_err().is_not_exist());
    assert!(remote.remove("gone.txt").await.unwrap_err().is_not_exist());
    assert!(remote.open("gone.txt").await.unwrap_err().is_not_exist());
}

#[tokio::test]
async fn test_rename_is_not_supported() {
    let (_tmpdir, address) = start_server().await;
    let remote = client(&address, Some(token()));
    assert!(matches!(
        remote.rename("a", "b").await,
        Err(Error::NotImplemented { .. })
    ));
    assert!(matches!(
        remote.mkdir("dir").await,
        Err(Error::NotImplemented { .. })
    ));
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let (_tmpdir, address) = start_server().await;
    let remote = client(&address, None);
    assert!(matches!(
        remote.stat("anything.txt").await,
        Err(Error::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_requests_with_foreign_token_are_rejected() {
    let (_tmpdir, address) = start_server().await;
    let foreign = mint_token("secret", "other", Algorithm::HS256, Duration::from_secs(300))
        .unwrap();
    let remote = client(&address, Some(foreign));
    assert!(matches!(
        remote.stat("anything.txt").await,
        Err(Error::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_full_path_is_the_vfs_uri() {
    let (_tmpdir, address) = start_server().await;
    let remote = client(&address, Some(token()));
    assert_eq!(
        remote.full_path("a/b.txt").unwrap(),
        "vfs://data/a/b.txt"
    );
    let sub = remote.sub("a").unwrap();
    assert_eq!(sub.full_path("b.txt").unwrap(), "vfs://data/a/b.txt");
}
