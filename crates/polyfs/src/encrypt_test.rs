// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use super::*;
use crate::fixtures::{BufSink, SharedBuf};
use crate::fs::FileWrite as _;
use crate::kms::{KmsAead, LocalKms};

async fn seal(plaintext: &[u8], aad: &[u8]) -> (Vec<u8>, [u8; KEY_SIZE]) {
    let buf = SharedBuf::new();
    let mut sink = EncryptSink::new(Box::new(BufSink::new(buf.clone())), aad);
    let key = *sink.data_key();
    sink.write_all(plaintext).await.unwrap();
    sink.close().await.unwrap();
    (buf.bytes(), key)
}

#[tokio::test]
async fn test_round_trip_small() {
    let (sealed, key) = seal(b"attack at dawn", b"path/to/target.zip").await;
    let opened = decrypt_stream(&sealed, &key, b"path/to/target.zip").unwrap();
    assert_eq!(opened, b"attack at dawn");
}

#[tokio::test]
async fn test_round_trip_multiple_chunks() {
    let plaintext: Vec<u8> = (0..CHUNK_SIZE * 2 + 511).map(|i| (i % 251) as u8).collect();
    let (sealed, key) = seal(&plaintext, b"aad").await;
    // two full chunks plus a short final one, each framed with nonce + tag
    assert_eq!(
        sealed.len(),
        plaintext.len() + 3 * (NONCE_SIZE + TAG_SIZE)
    );
    assert_eq!(decrypt_stream(&sealed, &key, b"aad").unwrap(), plaintext);
}

#[tokio::test]
async fn test_empty_stream_still_authenticated() {
    let (sealed, key) = seal(b"", b"aad").await;
    assert_eq!(sealed.len(), NONCE_SIZE + TAG_SIZE);
    assert_eq!(decrypt_stream(&sealed, &key, b"aad").unwrap(), b"");
}

#[tokio::test]
async fn test_wrong_aad_fails_authentication() {
    let (sealed, key) = seal(b"payload", b"right").await;
    assert!(matches!(
        decrypt_stream(&sealed, &key, b"wrong"),
        Err(Error::Crypto(_))
    ));
}

#[tokio::test]
async fn test_truncated_stream_fails() {
    let (sealed, key) = seal(b"payload", b"aad").await;
    assert!(decrypt_stream(&sealed[..sealed.len() - 1], &key, b"aad").is_err());
}

#[tokio::test]
async fn test_key_wrap_round_trip() {
    let kms = LocalKms::from_key_bytes(&[7u8; KEY_SIZE]).unwrap();
    let (_, key) = seal(b"payload", b"aad").await;

    let wrapped = kms.encrypt(&key, b"aad").await.unwrap();
    let file = KeyFile::new(&wrapped, b"aad");
    let json = serde_json::to_string(&file).unwrap();

    let parsed: KeyFile = serde_json::from_str(&json).unwrap();
    let unwrapped = kms
        .decrypt(&parsed.encrypted_key_bytes().unwrap(), &parsed.aad_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(unwrapped, key);
}
