// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use sha2::{Digest, Sha256, Sha512};

use super::*;
use crate::fixtures::{BufSink, SharedBuf};
use crate::fs::FileWrite as _;

#[tokio::test]
async fn test_digest_sink_forwards_and_hashes() {
    let buf = SharedBuf::new();
    let (mut sink, digests) = DigestSink::new(
        Box::new(BufSink::new(buf.clone())),
        &[DigestAlgorithm::Sha256, DigestAlgorithm::Sha512],
    );

    sink.write_all(b"hello ").await.unwrap();
    sink.write_all(b"world").await.unwrap();
    assert!(digests.get().is_none(), "digests published before close");
    sink.close().await.unwrap();

    assert_eq!(buf.bytes(), b"hello world");

    let digests = digests.get().expect("digests missing after close");
    assert_eq!(
        digests[&DigestAlgorithm::Sha256],
        hex::encode(Sha256::digest(b"hello world"))
    );
    assert_eq!(
        digests[&DigestAlgorithm::Sha512],
        hex::encode(Sha512::digest(b"hello world"))
    );
}

#[tokio::test]
async fn test_digest_sink_without_algorithms() {
    let buf = SharedBuf::new();
    let (mut sink, digests) = DigestSink::new(Box::new(BufSink::new(buf.clone())), &[]);
    sink.write_all(b"data").await.unwrap();
    sink.close().await.unwrap();
    assert!(digests.get().expect("published").is_empty());
}

#[test]
fn test_sidecar_line() {
    assert_eq!(sidecar_line("abc123", "x.zip"), "abc123 *x.zip\n");
}

#[test]
fn test_algorithm_names_round_trip() {
    for alg in [DigestAlgorithm::Sha256, DigestAlgorithm::Sha512] {
        assert_eq!(alg.as_str().parse::<DigestAlgorithm>().unwrap(), alg);
    }
    assert!("md5".parse::<DigestAlgorithm>().is_err());
}
