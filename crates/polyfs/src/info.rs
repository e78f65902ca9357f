// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// POSIX directory bit, used where a backend reports no native mode.
pub const MODE_DIR: u32 = 0o040000;

/// Metadata for a single file or directory in a virtual filesystem.
///
/// `mode` carries POSIX-style bits where the backend reports them and `0`
/// where it does not (object stores). `is_dir` is authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    #[serde(rename = "modTime")]
    pub modified: DateTime<Utc>,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
}

impl FileInfo {
    pub fn new_file<S: Into<String>>(name: S, size: u64, mode: u32, modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            modified,
            is_dir: false,
        }
    }

    /// A synthetic directory entry, used where a backend has no real
    /// directory object but must present one (object-store prefixes,
    /// archives mounted as folders).
    pub fn new_dir<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode: MODE_DIR | 0o755,
            modified: Utc.timestamp_opt(0, 0).unwrap(),
            is_dir: true,
        }
    }
}

/// A directory listing entry: the name, a type flag, and the full info it
/// was derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    info: FileInfo,
}

impl DirEntry {
    pub fn from_info(info: FileInfo) -> Self {
        Self { info }
    }

    pub fn new_dir<S: Into<String>>(name: S) -> Self {
        Self {
            info: FileInfo::new_dir(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_dir(&self) -> bool {
        self.info.is_dir
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn into_info(self) -> FileInfo {
        self.info
    }
}

/// Sort a listing by name and drop duplicate names, keeping the first.
pub fn sort_dedup(mut entries: Vec<DirEntry>) -> Vec<DirEntry> {
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    entries.dedup_by(|a, b| a.name() == b.name());
    entries
}
