// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::fs::FileWrite;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// The lowercase name, also used as the side-car file suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            other => Err(Error::new(format!("unknown digest algorithm '{other}'"))),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(alg: DigestAlgorithm) -> Self {
        match alg {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Shared handle through which a [`DigestSink`] publishes its results once
/// closed.
#[derive(Clone, Default)]
pub struct Digests(Arc<Mutex<Option<HashMap<DigestAlgorithm, String>>>>);

impl Digests {
    /// The hex digests, available after the owning sink has closed.
    pub fn get(&self) -> Option<HashMap<DigestAlgorithm, String>> {
        self.0.lock().expect("digest handle poisoned").clone()
    }

    fn publish(&self, digests: HashMap<DigestAlgorithm, String>) {
        *self.0.lock().expect("digest handle poisoned") = Some(digests);
    }
}

/// A write-tee that feeds every byte into one or more digest engines while
/// forwarding them to the wrapped sink.
pub struct DigestSink {
    inner: Box<dyn FileWrite>,
    hashers: Vec<(DigestAlgorithm, Hasher)>,
    out: Digests,
}

impl DigestSink {
    pub fn new(inner: Box<dyn FileWrite>, algs: &[DigestAlgorithm]) -> (Self, Digests) {
        let out = Digests::default();
        let sink = Self {
            inner,
            hashers: algs.iter().map(|alg| (*alg, Hasher::new(*alg))).collect(),
            out: out.clone(),
        };
        let handle = sink.out.clone();
        (sink, handle)
    }
}

#[async_trait]
impl FileWrite for DigestSink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf).await?;
        for (_, hasher) in self.hashers.iter_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let digests = self
            .hashers
            .drain(..)
            .map(|(alg, hasher)| (alg, hasher.finalize_hex()))
            .collect();
        self.out.publish(digests);
        self.inner.close().await
    }
}

/// The side-car file body: `<hex-digest> *<file-name>\n`.
pub fn sidecar_line(digest: &str, file_name: &str) -> String {
    format!("{digest} *{file_name}\n")
}

#[cfg(test)]
#[path = "./checksum_test.rs"]
mod checksum_test;
