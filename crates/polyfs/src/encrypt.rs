// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::fs::FileWrite;
use crate::{Error, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
/// Plaintext bytes sealed per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A sink that seals its input into a framed AES-256-GCM stream.
///
/// Frame layout per chunk: a random 12-byte nonce followed by the
/// ciphertext and tag. The chunk's additional data binds the stream AAD,
/// the chunk index, and a final-chunk flag, so chunks cannot be reordered,
/// dropped, or truncated without failing authentication. Close always seals
/// a final chunk (possibly empty) to authenticate the end of the stream.
pub struct EncryptSink {
    inner: Box<dyn FileWrite>,
    cipher: Aes256Gcm,
    data_key: [u8; KEY_SIZE],
    stream_aad: Vec<u8>,
    chunk: Vec<u8>,
    counter: u64,
}

impl EncryptSink {
    /// Wrap `inner` with a freshly generated random data key.
    pub fn new(inner: Box<dyn FileWrite>, stream_aad: &[u8]) -> Self {
        let mut data_key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut data_key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key));
        Self {
            inner,
            cipher,
            data_key,
            stream_aad: stream_aad.to_vec(),
            chunk: Vec::with_capacity(CHUNK_SIZE),
            counter: 0,
        }
    }

    /// The data key protecting this stream; wrap it with a KMS AEAD and
    /// persist the result, never the key itself.
    pub fn data_key(&self) -> &[u8; KEY_SIZE] {
        &self.data_key
    }

    fn chunk_aad(&self, index: u64, last: bool) -> Vec<u8> {
        let mut aad = self.stream_aad.clone();
        aad.extend_from_slice(&index.to_be_bytes());
        aad.push(last as u8);
        aad
    }

    async fn seal_chunk(&mut self, last: bool) -> Result<()> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let aad = self.chunk_aad(self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &self.chunk,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Crypto("AES-GCM encryption failed".to_owned()))?;
        self.counter += 1;
        self.chunk.clear();
        self.inner.write_all(&nonce).await?;
        self.inner.write_all(&ciphertext).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FileWrite for EncryptSink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let room = CHUNK_SIZE - self.chunk.len();
            let take = room.min(rest.len());
            self.chunk.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.chunk.len() == CHUNK_SIZE {
                self.seal_chunk(false).await?;
            }
        }
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.seal_chunk(true).await?;
        self.inner.close().await
    }
}

/// Decrypt a complete framed stream produced by [`EncryptSink`].
pub fn decrypt_stream(data: &[u8], key: &[u8; KEY_SIZE], stream_aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let frame = NONCE_SIZE + CHUNK_SIZE + TAG_SIZE;
    let mut out = Vec::new();
    let mut rest = data;
    let mut index = 0u64;
    loop {
        if rest.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Crypto("truncated encrypted stream".to_owned()));
        }
        let take = frame.min(rest.len());
        let last = take == rest.len();
        let (nonce, ciphertext) = rest[..take].split_at(NONCE_SIZE);
        let mut aad = stream_aad.to_vec();
        aad.extend_from_slice(&index.to_be_bytes());
        aad.push(last as u8);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Crypto(format!("AES-GCM authentication failed on chunk {index}")))?;
        out.extend_from_slice(&plaintext);
        rest = &rest[take..];
        index += 1;
        if last {
            return Ok(out);
        }
    }
}

/// The persisted key artifact: the data key wrapped by an external AEAD,
/// plus the additional data the stream was bound to.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyFile {
    pub encrypted_key: String,
    pub aad: String,
}

impl KeyFile {
    pub fn new(encrypted_key: &[u8], aad: &[u8]) -> Self {
        Self {
            encrypted_key: BASE64.encode(encrypted_key),
            aad: BASE64.encode(aad),
        }
    }

    pub fn encrypted_key_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.encrypted_key)
            .map_err(|err| Error::Crypto(format!("invalid key file encoding: {err}")))
    }

    pub fn aad_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.aad)
            .map_err(|err| Error::Crypto(format!("invalid key file encoding: {err}")))
    }
}

#[cfg(test)]
#[path = "./encrypt_test.rs"]
mod encrypt_test;
