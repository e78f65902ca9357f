// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;

use crate::fs::{FileRead, FileSystem, FileWrite, SharedFs, WalkVisitor};
use crate::info::{DirEntry, FileInfo};
use crate::{Error, ErrorList, Result};

fn vfs_path_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^vfs://?([^/]+)/(.*)$").expect("static regex"))
}

/// Split a `vfs://<name>/<path>` address into its mount name and subpath.
pub fn split_vfs_path(vfs_path: &str) -> Result<(&str, &str)> {
    let captures = vfs_path_regex()
        .captures(vfs_path)
        .ok_or_else(|| Error::InvalidPath(vfs_path.to_owned()))?;
    Ok((
        captures.get(1).expect("group").as_str(),
        captures.get(2).expect("group").as_str(),
    ))
}

/// A name-routed mount table: every path entering carries the form
/// `vfs://<name>/<subpath>`; the name selects the mounted filesystem and
/// the subpath is passed downward.
///
/// The mount set is fixed at construction, so lookups take no lock.
#[derive(Debug)]
pub struct MuxFs {
    mounts: HashMap<String, SharedFs>,
}

impl MuxFs {
    pub fn new(mounts: HashMap<String, SharedFs>) -> Self {
        Self { mounts }
    }

    pub fn mount_names(&self) -> Vec<&str> {
        self.mounts.keys().map(String::as_str).collect()
    }

    fn route<'a>(&self, vfs_path: &'a str) -> Result<(&SharedFs, &'a str)> {
        let (name, rest) = split_vfs_path(vfs_path)?;
        let fs = self
            .mounts
            .get(name)
            .ok_or_else(|| Error::NotConfigured(name.to_owned()))?;
        Ok((fs, rest))
    }
}

impl fmt::Display for MuxFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.mount_names();
        names.sort_unstable();
        write!(f, "mux({})", names.join(","))
    }
}

#[async_trait]
impl FileSystem for MuxFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let (fs, rest) = self.route(name)?;
        fs.open(rest).await
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        let (fs, rest) = self.route(name)?;
        fs.stat(rest).await
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let (fs, rest) = self.route(name)?;
        fs.read_dir(rest).await
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let (fs, rest) = self.route(name)?;
        fs.read_file(rest).await
    }

    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let (fs, rest) = self.route(name)?;
        fs.create(rest).await
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let (fs, rest) = self.route(name)?;
        fs.mkdir(rest).await
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let (old_mount, _) = split_vfs_path(old_name)?;
        let (new_mount, _) = split_vfs_path(new_name)?;
        if old_mount != new_mount {
            return Err(Error::Invalid(format!(
                "cannot rename across filesystems '{old_mount}' -> '{new_mount}'"
            )));
        }
        let (fs, old_rest) = self.route(old_name)?;
        let (_, new_rest) = self.route(new_name)?;
        fs.rename(old_rest, new_rest).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let (fs, rest) = self.route(name)?;
        fs.remove(rest).await
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<u64> {
        let (fs, rest) = self.route(name)?;
        fs.write_file(rest, data).await
    }

    async fn walk_dir(&self, name: &str, visit: WalkVisitor<'_>) -> Result<()> {
        let (fs, rest) = self.route(name)?;
        fs.walk_dir(rest, visit).await
    }

    fn full_path(&self, name: &str) -> Result<String> {
        let (fs, rest) = self.route(name)?;
        fs.full_path(rest)
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        let (fs, rest) = self.route(dir)?;
        fs.sub(rest)
    }

    /// Close every mounted filesystem, attempting all of them and
    /// combining the errors.
    async fn close(&self) -> Result<()> {
        let mut errs = ErrorList::new();
        for (name, fs) in self.mounts.iter() {
            if let Err(err) = fs.close().await {
                errs.push(Error::new(format!("cannot close vfs '{name}': {err}")));
            }
        }
        errs.finish()
    }
}

#[cfg(test)]
#[path = "./mux_test.rs"]
mod mux_test;
