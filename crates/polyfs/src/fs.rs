// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::info::{DirEntry, FileInfo};
use crate::{path, Error, ErrorList, Result};

pub type SharedFs = Arc<dyn FileSystem>;

/// A visitor invoked for every entry found by [`FileSystem::walk_dir`].
pub type WalkVisitor<'a> = &'a mut (dyn FnMut(&str, &DirEntry) -> Result<()> + Send);

/// The uniform surface over every storage backend.
///
/// Backends differ in what they can do: object stores cannot rename
/// atomically, archives cannot create, remote mirrors forbid directory
/// creation. The optional operations therefore carry default bodies that
/// return [`Error::NotImplemented`], so a backend only implements what it
/// actually supports and callers can be written once against the full
/// surface.
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Display {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>>;

    async fn stat(&self, name: &str) -> Result<FileInfo>;

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>>;

    /// A view of this filesystem rooted at `dir`.
    fn sub(&self, dir: &str) -> Result<SharedFs>;

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let mut fp = self.open(name).await?;
        let data = read_all(fp.as_mut()).await;
        let closed = fp.close().await;
        let data = data?;
        closed?;
        Ok(data)
    }

    /// Open a streaming sink at `name`. Closing the sink is the commit
    /// point and may surface errors from a background upload.
    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let _ = name;
        Err(Error::NotImplemented { op: "create" })
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let _ = name;
        Err(Error::NotImplemented { op: "mkdir" })
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let _ = (old_name, new_name);
        Err(Error::NotImplemented { op: "rename" })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let _ = name;
        Err(Error::NotImplemented { op: "remove" })
    }

    /// Release the backend's resources. A close propagates to everything
    /// the backend owns; operations issued afterwards fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// The backend-native absolute form of `name`, for callers that need a
    /// true host path or URI.
    fn full_path(&self, name: &str) -> Result<String> {
        let _ = name;
        Err(Error::NotImplemented { op: "full_path" })
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<u64> {
        let mut fp = self.create(name).await?;
        let written = fp.write_all(data).await;
        let closed = fp.close().await;
        written?;
        closed?;
        Ok(data.len() as u64)
    }

    /// Visit every entry below `name`, depth first.
    async fn walk_dir(&self, name: &str, visit: WalkVisitor<'_>) -> Result<()> {
        let mut pending = vec![path::clean(name)?];
        while let Some(dir) = pending.pop() {
            let entries = self.read_dir(&dir).await?;
            let mut subdirs = Vec::new();
            for entry in entries {
                let child = path::join(&dir, entry.name());
                visit(&child, &entry)?;
                if entry.is_dir() {
                    subdirs.push(child);
                }
            }
            // LIFO stack: reversed push keeps listing order
            while let Some(sub) = subdirs.pop() {
                pending.push(sub);
            }
        }
        Ok(())
    }

    /// Advisory: whether this filesystem currently has an operation or open
    /// file holding its internal lock. Used by cache reapers only; it races
    /// with the lock itself and must not guard correctness.
    fn is_locked(&self) -> bool {
        false
    }
}

/// An open file being read: a lazy byte sequence with metadata.
///
/// Closing releases whatever slot the backend tied to the handle (a pooled
/// session, a cached-archive lock). Dropping without a close releases it
/// too, but loses the error.
#[async_trait]
pub trait FileRead: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn stat(&self) -> Result<FileInfo>;

    async fn close(&mut self) -> Result<()>;

    /// Convert into a positioned reader, or give the handle back when the
    /// backend only supports sequential reads. Mounting an archive requires
    /// the positioned form.
    fn random_access(self: Box<Self>) -> MaybeRandomAccess;
}

impl fmt::Debug for dyn FileRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn FileRead")
    }
}

impl fmt::Debug for dyn FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Outcome of probing an open file for positioned-read support.
pub enum MaybeRandomAccess {
    Random(Arc<dyn RandomAccess>),
    Sequential(Box<dyn FileRead>),
}

/// Positioned reads over an open file. Reads at different offsets do not
/// disturb each other; callers serialize access where the transport needs
/// it.
#[async_trait]
pub trait RandomAccess: Send + Sync {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    async fn close(&self) -> Result<()>;
}

/// An open streaming sink. Close is the commit point: it may block on a
/// background upload and surfaces that upload's terminal status.
#[async_trait]
pub trait FileWrite: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    async fn close(&mut self) -> Result<()>;

    async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(Error::io(
                    "short write".to_owned(),
                    std::io::ErrorKind::WriteZero.into(),
                ));
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Stream every byte from `reader` into `writer`, returning the count.
pub async fn copy(reader: &mut dyn FileRead, writer: &mut dyn FileWrite) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

/// Read the remainder of an open file into memory.
pub async fn read_all(reader: &mut dyn FileRead) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(data);
        }
        data.extend_from_slice(&buf[..n]);
    }
}

/// Fill `buf` from `offset`, failing on a short read.
pub async fn read_exact_at(ra: &dyn RandomAccess, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let n = ra.read_at(offset + done as u64, &mut buf[done..]).await?;
        if n == 0 {
            return Err(Error::io(
                format!("unexpected end of file at offset {}", offset + done as u64),
                std::io::ErrorKind::UnexpectedEof.into(),
            ));
        }
        done += n;
    }
    Ok(())
}

/// Copy `src` to `dst` on the same filesystem, closing both handles on
/// every exit path and combining any errors encountered.
pub async fn copy_path(fs: &dyn FileSystem, src: &str, dst: &str) -> Result<u64> {
    let mut from = fs
        .open(src)
        .await
        .map_err(|err| Error::new(format!("cannot open source '{src}': {err}")))?;
    let mut to = match fs.create(dst).await {
        Ok(to) => to,
        Err(err) => {
            let mut errs = ErrorList::new();
            errs.push(Error::new(format!("cannot create destination '{dst}': {err}")));
            errs.record(from.close().await);
            return Err(errs.finish().unwrap_err());
        }
    };
    let mut errs = ErrorList::new();
    let copied = errs.record(copy(from.as_mut(), to.as_mut()).await);
    errs.record(to.close().await);
    errs.record(from.close().await);
    errs.finish()?;
    Ok(copied.unwrap_or(0))
}
