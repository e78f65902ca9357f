// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::fs::{FileRead, FileSystem, MaybeRandomAccess, RandomAccess, SharedFs};
use crate::info::{sort_dedup, DirEntry, FileInfo};
use crate::lock::ObservableMutex;
use crate::zipstream::{read_central_directory, ArchiveEntry, EntryReader, RawEntryReader};
use crate::{path, Error, Result};

/// An archive presented as a read-only file tree.
///
/// The central directory is held in memory; entry reads stream from the
/// backing file through positioned reads. At most one entry stream is open
/// at a time: `open` acquires the archive mutex and the returned stream's
/// close releases it. Upstream caches may evict the archive only while
/// [`is_locked`](FileSystem::is_locked) reports false.
#[derive(Clone)]
pub struct ZipFs {
    inner: Arc<ZipInner>,
}

struct ZipInner {
    label: String,
    entries: Vec<ArchiveEntry>,
    index: HashMap<String, usize>,
    backing: Arc<dyn RandomAccess>,
    lock: ObservableMutex,
}

impl ZipFs {
    /// Build an archive view over a positioned reader of `size` bytes.
    pub async fn new(backing: Arc<dyn RandomAccess>, size: u64, label: &str) -> Result<Self> {
        let entries = read_central_directory(backing.as_ref(), size)
            .await
            .map_err(|err| Error::new(format!("cannot read archive '{label}': {err}")))?;
        let index = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.header.name.clone(), idx))
            .collect();
        Ok(Self {
            inner: Arc::new(ZipInner {
                label: label.to_owned(),
                entries,
                index,
                backing,
                lock: ObservableMutex::new(),
            }),
        })
    }

    /// Open the archive file `name` on `base` and mount it. The file must
    /// support positioned reads; its handle stays open until this archive
    /// is closed.
    pub async fn open_from(base: &dyn FileSystem, name: &str) -> Result<Self> {
        let info = base.stat(name).await?;
        let fp = base
            .open(name)
            .await
            .map_err(|err| Error::new(format!("cannot open archive '{name}': {err}")))?;
        match fp.random_access() {
            MaybeRandomAccess::Random(backing) => Self::new(backing, info.size, name).await,
            MaybeRandomAccess::Sequential(mut fp) => {
                let _ = fp.close().await;
                Err(Error::Invalid(format!(
                    "file '{name}' does not support positioned reads"
                )))
            }
        }
    }

    /// The archive's central directory, for raw-copy rewrites.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.inner.entries
    }

    fn find(&self, name: &str) -> Option<&ArchiveEntry> {
        self.inner
            .index
            .get(name)
            .map(|idx| &self.inner.entries[*idx])
    }

    /// The still-compressed bytes of an entry, for preserving it verbatim
    /// in a rewritten archive. Holds the archive mutex like `open`.
    pub async fn open_raw(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let name = path::clean(name)?;
        let entry = self
            .find(&name)
            .ok_or_else(|| Error::NotExist(name.clone()))?;
        let guard = self.inner.lock.acquire().await;
        let reader =
            RawEntryReader::open(self.inner.backing.clone(), entry, Some(guard)).await?;
        Ok(Box::new(reader))
    }

    /// Close the backing file. Callers must ensure no entry stream is
    /// still open.
    pub async fn close_archive(&self) -> Result<()> {
        self.inner
            .backing
            .close()
            .await
            .map_err(|err| Error::new(format!("cannot close archive '{}': {err}", self.inner.label)))
    }
}

impl fmt::Display for ZipFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zip({}, {} entries)", self.inner.label, self.inner.entries.len())
    }
}

#[async_trait]
impl FileSystem for ZipFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let name = path::clean(name)?;
        let entry = self
            .find(&name)
            .ok_or_else(|| Error::NotExist(name.clone()))?;
        let guard = self.inner.lock.acquire().await;
        let reader = EntryReader::open(self.inner.backing.clone(), entry, Some(guard))
            .await
            .map_err(|err| Error::new(format!("cannot open '{name}': {err}")))?;
        Ok(Box::new(reader))
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        let name = path::clean(name)?;
        let _guard = self.inner.lock.acquire().await;
        if name.is_empty() {
            return Ok(FileInfo::new_dir(path::base_name(&self.inner.label)));
        }
        if let Some(entry) = self.find(&name) {
            return Ok(entry.header.info());
        }
        // a prefix with entries below it is a directory
        let prefix = format!("{name}/");
        if self
            .inner
            .entries
            .iter()
            .any(|entry| entry.header.name.starts_with(&prefix))
        {
            return Ok(FileInfo::new_dir(path::base_name(&name)));
        }
        Err(Error::NotExist(name))
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let name = path::clean(name)?;
        let _guard = self.inner.lock.acquire().await;
        let prefix = if name.is_empty() {
            String::new()
        } else {
            format!("{name}/")
        };
        let mut entries = Vec::new();
        for entry in self.inner.entries.iter() {
            let Some(rest) = entry.header.name.strip_prefix(&prefix) else {
                continue;
            };
            let rest = rest.trim_matches('/');
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                None if entry.header.is_dir() => entries.push(DirEntry::new_dir(rest)),
                None => entries.push(DirEntry::from_info(entry.header.info())),
                Some((first, _)) => entries.push(DirEntry::new_dir(first)),
            }
        }
        Ok(sort_dedup(entries))
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        crate::storage::sub::SubFs::new(Arc::new(self.clone()), dir)
            .map(|sub| Arc::new(sub) as SharedFs)
    }

    async fn close(&self) -> Result<()> {
        self.close_archive().await
    }

    fn is_locked(&self) -> bool {
        self.inner.lock.is_locked()
    }
}

#[cfg(test)]
#[path = "./zip_test.rs"]
mod zip_test;
