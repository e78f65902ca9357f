// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::fmt;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::fs::{FileRead, FileSystem, FileWrite, MaybeRandomAccess, RandomAccess, SharedFs};
use crate::info::{DirEntry, FileInfo};
use crate::{path, Error, Result};

/// Thin mapping over the host filesystem, rooted at a base directory.
#[derive(Clone, Debug)]
pub struct OsFs {
    root: PathBuf,
}

impl OsFs {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let root = if dir.as_os_str().is_empty() || dir.is_relative() {
            let cwd = std::env::current_dir()
                .map_err(|err| Error::io("cannot get current working directory".to_owned(), err))?;
            cwd.join(dir)
        } else {
            dir.to_path_buf()
        };
        // an existing root must be a directory
        if let Ok(meta) = std::fs::metadata(&root) {
            if !meta.is_dir() {
                return Err(Error::Invalid(format!(
                    "not a directory: {}",
                    root.display()
                )));
            }
        }
        Ok(Self { root })
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let name = path::clean(name)?;
        if name.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(name))
    }
}

impl fmt::Display for OsFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os({})", self.root.display())
    }
}

fn info_from_metadata(name: &str, meta: &std::fs::Metadata) -> FileInfo {
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH);
    FileInfo {
        name: name.to_owned(),
        size: meta.len(),
        mode: meta.permissions().mode(),
        modified,
        is_dir: meta.is_dir(),
    }
}

fn map_not_found(err: std::io::Error, name: &str, op: &str) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::NotExist(name.to_owned())
    } else {
        Error::io(format!("cannot {op} '{name}'"), err)
    }
}

#[async_trait]
impl FileSystem for OsFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let full = self.resolve(name)?;
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|err| map_not_found(err, name, "open"))?;
        Ok(Box::new(OsFileRead {
            file,
            name: path::base_name(name).to_owned(),
        }))
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        let full = self.resolve(name)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|err| map_not_found(err, name, "stat"))?;
        Ok(info_from_metadata(path::base_name(name), &meta))
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let full = self.resolve(name)?;
        let mut rd = tokio::fs::read_dir(&full)
            .await
            .map_err(|err| map_not_found(err, name, "read directory"))?;
        let mut entries = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|err| Error::io(format!("cannot read directory '{name}'"), err))?
        {
            let entry_name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry
                .metadata()
                .await
                .map_err(|err| Error::io(format!("cannot stat '{entry_name}'"), err))?;
            entries.push(DirEntry::from_info(info_from_metadata(&entry_name, &meta)));
        }
        Ok(entries)
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let full = self.resolve(name)?;
        tokio::fs::read(&full)
            .await
            .map_err(|err| map_not_found(err, name, "read"))
    }

    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let full = self.resolve(name)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::io(format!("cannot create '{name}'"), err))?;
        }
        let file = tokio::fs::File::create(&full)
            .await
            .map_err(|err| Error::io(format!("cannot create '{name}'"), err))?;
        Ok(Box::new(OsFileWrite {
            file,
            name: name.to_owned(),
        }))
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let full = self.resolve(name)?;
        tokio::fs::create_dir(&full).await.map_err(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                Error::Exists(name.to_owned())
            } else {
                Error::io(format!("cannot create directory '{name}'"), err)
            }
        })
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_full = self.resolve(old_name)?;
        let new_full = self.resolve(new_name)?;
        tokio::fs::rename(&old_full, &new_full)
            .await
            .map_err(|err| map_not_found(err, old_name, "rename"))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let full = self.resolve(name)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::NotExist(name.to_owned())),
            Err(_) => tokio::fs::remove_dir(&full)
                .await
                .map_err(|err| map_not_found(err, name, "remove")),
        }
    }

    fn full_path(&self, name: &str) -> Result<String> {
        let full = self.resolve(name)?;
        Ok(full.to_string_lossy().replace('\\', "/"))
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        let root = self.resolve(dir)?;
        Ok(Arc::new(OsFs { root }))
    }
}

struct OsFileRead {
    file: tokio::fs::File,
    name: String,
}

#[async_trait]
impl FileRead for OsFileRead {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file
            .read(buf)
            .await
            .map_err(|err| Error::io(format!("cannot read '{}'", self.name), err))
    }

    async fn stat(&self) -> Result<FileInfo> {
        let meta = self
            .file
            .metadata()
            .await
            .map_err(|err| Error::io(format!("cannot stat '{}'", self.name), err))?;
        Ok(info_from_metadata(&self.name, &meta))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn random_access(self: Box<Self>) -> MaybeRandomAccess {
        match self.file.try_into_std() {
            Ok(file) => MaybeRandomAccess::Random(Arc::new(OsRandomFile {
                file,
                name: self.name,
            })),
            Err(file) => MaybeRandomAccess::Sequential(Box::new(OsFileRead {
                file,
                name: self.name,
            })),
        }
    }
}

struct OsRandomFile {
    file: std::fs::File,
    name: String,
}

#[async_trait]
impl RandomAccess for OsRandomFile {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file
            .read_at(buf, offset)
            .map_err(|err| Error::io(format!("cannot read '{}'", self.name), err))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct OsFileWrite {
    file: tokio::fs::File,
    name: String,
}

#[async_trait]
impl FileWrite for OsFileWrite {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file
            .write(buf)
            .await
            .map_err(|err| Error::io(format!("cannot write '{}'", self.name), err))
    }

    async fn close(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|err| Error::io(format!("cannot close '{}'", self.name), err))
    }
}

/// A factory constructor resolving `file://<abs-path>` to a local-disk
/// backend.
pub fn create_fs_fn() -> impl Fn(crate::factory::Factory, String) -> crate::factory::ConstructorFuture
{
    |_factory, path: String| -> crate::factory::ConstructorFuture {
        Box::pin(async move {
            let dir = path.trim_start_matches("file://").to_owned();
            Ok(Arc::new(OsFs::new(dir)?) as SharedFs)
        })
    }
}

#[cfg(test)]
#[path = "./os_test.rs"]
mod os_test;
