// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::encrypt::{KEY_SIZE, NONCE_SIZE};
use crate::{Error, Result};

/// An AEAD primitive resolved from a KMS URI, used to wrap data keys.
///
/// Cloud KMS schemes (`aws-kms://…`, `gcp-kms://…`) are an integration
/// contract for external providers; only `local-kms://<key-file>` ships
/// in-tree.
#[async_trait]
pub trait KmsAead: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;
}

/// Resolve a KMS URI to its AEAD primitive.
pub async fn resolve(uri: &str) -> Result<Box<dyn KmsAead>> {
    match uri.split_once("://") {
        Some(("local-kms", path)) => Ok(Box::new(LocalKms::load(path).await?)),
        Some((scheme, _)) => Err(Error::new(format!("no KMS client for scheme '{scheme}'"))),
        None => Err(Error::new(format!("invalid KMS uri '{uri}'"))),
    }
}

/// A key-wrapping AEAD backed by a 32-byte key file on the local host.
pub struct LocalKms {
    cipher: Aes256Gcm,
}

impl LocalKms {
    pub async fn load(path: &str) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|err| Error::io(format!("cannot read KMS key file '{path}'"), err))?;
        Self::from_key_bytes(&raw)
    }

    pub fn from_key_bytes(raw: &[u8]) -> Result<Self> {
        // accept a raw or hex-encoded 256-bit key
        let key: Vec<u8> = match raw.len() {
            KEY_SIZE => raw.to_vec(),
            _ => {
                let text = std::str::from_utf8(raw)
                    .map_err(|_| Error::Crypto("KMS key file is not a 256-bit key".to_owned()))?;
                hex::decode(text.trim())
                    .map_err(|_| Error::Crypto("KMS key file is not a 256-bit key".to_owned()))?
            }
        };
        if key.len() != KEY_SIZE {
            return Err(Error::Crypto("KMS key file is not a 256-bit key".to_owned()));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }
}

#[async_trait]
impl KmsAead for LocalKms {
    async fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let mut out = nonce.to_vec();
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| Error::Crypto("KMS key wrap failed".to_owned()))?;
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(Error::Crypto("wrapped key too short".to_owned()));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|_| Error::Crypto("KMS key unwrap failed".to_owned()))
    }
}
