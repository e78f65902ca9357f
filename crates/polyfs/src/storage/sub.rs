// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::fs::{FileRead, FileSystem, FileWrite, SharedFs, WalkVisitor};
use crate::info::{DirEntry, FileInfo};
use crate::{path, Result};

/// A transparent wrapper that prefixes every path with a fixed base before
/// delegating. A sub-filesystem rooted at `dir` never observes paths above
/// `dir`.
pub struct SubFs {
    inner: SharedFs,
    dir: String,
}

impl SubFs {
    pub fn new(inner: SharedFs, dir: &str) -> Result<Self> {
        Ok(Self {
            inner,
            dir: path::clean(dir)?,
        })
    }

    fn resolve(&self, name: &str) -> Result<String> {
        Ok(path::join(&self.dir, &path::clean(name)?))
    }
}

impl fmt::Display for SubFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub({}/{})", self.inner, self.dir)
    }
}

#[async_trait]
impl FileSystem for SubFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        self.inner.open(&self.resolve(name)?).await
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        self.inner.stat(&self.resolve(name)?).await
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        self.inner.read_dir(&self.resolve(name)?).await
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.inner.read_file(&self.resolve(name)?).await
    }

    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        self.inner.create(&self.resolve(name)?).await
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        self.inner.mkdir(&self.resolve(name)?).await
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.inner
            .rename(&self.resolve(old_name)?, &self.resolve(new_name)?)
            .await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.inner.remove(&self.resolve(name)?).await
    }

    fn full_path(&self, name: &str) -> Result<String> {
        self.inner.full_path(&self.resolve(name)?)
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<u64> {
        self.inner.write_file(&self.resolve(name)?, data).await
    }

    async fn walk_dir(&self, name: &str, visit: WalkVisitor<'_>) -> Result<()> {
        let prefix = format!("{}/", self.dir);
        self.inner
            .walk_dir(&self.resolve(name)?, &mut |full, entry| {
                // visitors see paths relative to this root
                let stripped = full.strip_prefix(&prefix).unwrap_or(full);
                visit(stripped, entry)
            })
            .await
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        Ok(Arc::new(SubFs {
            inner: self.inner.clone(),
            dir: self.resolve(dir)?,
        }))
    }

    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(test)]
#[path = "./sub_test.rs"]
mod sub_test;
