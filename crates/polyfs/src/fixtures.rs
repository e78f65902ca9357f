// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

//! Shared in-memory handles for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::fs::{FileRead, FileWrite, MaybeRandomAccess, RandomAccess};
use crate::info::FileInfo;
use crate::Result;

#[allow(dead_code)]
pub fn init_logging() {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .without_time()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(sub);
}

/// A byte buffer observable after the sink writing to it has closed.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// A [`FileWrite`] sink collecting everything into a [`SharedBuf`].
pub struct BufSink {
    buf: SharedBuf,
    pub closed: bool,
}

impl BufSink {
    pub fn new(buf: SharedBuf) -> Self {
        Self { buf, closed: false }
    }
}

#[async_trait]
impl FileWrite for BufSink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.buf.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A [`FileRead`] over an in-memory byte vector, convertible into a
/// positioned reader.
pub struct MemFile {
    data: Arc<Vec<u8>>,
    pos: usize,
    name: String,
}

impl MemFile {
    pub fn new<S: Into<String>>(name: S, data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            pos: 0,
            name: name.into(),
        }
    }
}

#[async_trait]
impl FileRead for MemFile {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(FileInfo::new_file(
            self.name.clone(),
            self.data.len() as u64,
            0o644,
            Utc::now(),
        ))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn random_access(self: Box<Self>) -> MaybeRandomAccess {
        MaybeRandomAccess::Random(Arc::new(MemRandom { data: self.data }))
    }
}

pub struct MemRandom {
    data: Arc<Vec<u8>>,
}

#[async_trait]
impl RandomAccess for MemRandom {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = (offset as usize).min(self.data.len());
        let rest = &self.data[offset..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
