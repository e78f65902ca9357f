// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::info::FileInfo;
use crate::path;

pub(crate) const LOCAL_HEADER_SIG: u32 = 0x04034b50;
pub(crate) const CENTRAL_HEADER_SIG: u32 = 0x02014b50;
pub(crate) const DATA_DESCRIPTOR_SIG: u32 = 0x08074b50;
pub(crate) const EOCD_SIG: u32 = 0x06054b50;
pub(crate) const ZIP64_EOCD_SIG: u32 = 0x06064b50;
pub(crate) const ZIP64_LOCATOR_SIG: u32 = 0x07064b50;

pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub(crate) const FLAG_UTF8: u16 = 0x0800;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    /// Any other registered method. Entries carrying one can be raw-copied
    /// but not decompressed.
    Other(u16),
}

impl CompressionMethod {
    pub(crate) fn from_code(code: u16) -> Self {
        match code {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            other => CompressionMethod::Other(other),
        }
    }

    pub(crate) fn code(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Other(code) => *code,
        }
    }
}

/// The facts about one archive entry carried between reader and writer.
/// A raw copy preserves everything here along with the compressed bytes.
#[derive(Clone, Debug)]
pub struct EntryHeader {
    pub name: String,
    pub method: CompressionMethod,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub modified: DateTime<Utc>,
    pub mode: u32,
}

impl EntryHeader {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn info(&self) -> FileInfo {
        if self.is_dir() {
            FileInfo::new_dir(path::base_name(self.name.trim_end_matches('/')))
        } else {
            FileInfo::new_file(
                path::base_name(&self.name),
                self.uncompressed_size,
                self.mode,
                self.modified,
            )
        }
    }
}

/// MS-DOS (time, date) pair for a timestamp, clamped to the representable
/// range.
pub(crate) fn to_dos_time(dt: &DateTime<Utc>) -> (u16, u16) {
    let year = dt.year();
    if year < 1980 {
        return (0, 0x21); // 1980-01-01
    }
    if year > 2107 {
        return (0xbf7d, 0xff9f); // 2107-12-31 23:59
    }
    let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time =
        ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (time, date)
}

pub(crate) fn from_dos_time(time: u16, date: u16) -> DateTime<Utc> {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0f) as u32;
    let day = (date & 0x1f) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3f) as u32;
    let second = ((time & 0x1f) * 2) as u32;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}
