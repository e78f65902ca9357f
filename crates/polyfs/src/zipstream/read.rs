// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::sync::Arc;

use async_trait::async_trait;
use flate2::{Decompress, FlushDecompress, Status};

use super::types::*;
use crate::fs::{read_exact_at, FileRead, MaybeRandomAccess, RandomAccess};
use crate::info::FileInfo;
use crate::lock::LockGuard;
use crate::{Error, Result};

const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_EOCD_LEN: usize = 56;
const LOCAL_HEADER_LEN: usize = 30;
const MAX_COMMENT: usize = 0xffff;
// central directories larger than this are rejected rather than buffered
const MAX_CENTRAL_DIR: u64 = 1 << 31;

const READ_CHUNK: usize = 64 * 1024;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Archive("truncated central directory".to_owned()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }
}

/// One central-directory record plus the location facts needed to reach its
/// data.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    pub header: EntryHeader,
    header_offset: u64,
}

impl ArchiveEntry {
    /// Locate the entry's first data byte by reading its local header.
    pub(crate) async fn data_offset(&self, backing: &dyn RandomAccess) -> Result<u64> {
        let mut buf = [0u8; LOCAL_HEADER_LEN];
        read_exact_at(backing, self.header_offset, &mut buf).await?;
        let mut cur = Cursor::new(&buf);
        if cur.u32()? != LOCAL_HEADER_SIG {
            return Err(Error::Archive(format!(
                "no local header for entry '{}'",
                self.header.name
            )));
        }
        let name_len = u16::from_le_bytes([buf[26], buf[27]]) as u64;
        let extra_len = u16::from_le_bytes([buf[28], buf[29]]) as u64;
        Ok(self.header_offset + LOCAL_HEADER_LEN as u64 + name_len + extra_len)
    }
}

struct EndOfDirectory {
    entries: u64,
    cd_size: u64,
    cd_offset: u64,
}

async fn find_end_of_directory(backing: &dyn RandomAccess, size: u64) -> Result<EndOfDirectory> {
    if size < EOCD_LEN as u64 {
        return Err(Error::Archive("file too small for an archive".to_owned()));
    }
    let tail_len = size.min((EOCD_LEN + MAX_COMMENT) as u64) as usize;
    let tail_start = size - tail_len as u64;
    let mut tail = vec![0u8; tail_len];
    read_exact_at(backing, tail_start, &mut tail).await?;

    let mut found = None;
    for idx in (0..=tail_len - EOCD_LEN).rev() {
        if u32::from_le_bytes(tail[idx..idx + 4].try_into().unwrap()) != EOCD_SIG {
            continue;
        }
        let comment_len =
            u16::from_le_bytes(tail[idx + 20..idx + 22].try_into().unwrap()) as usize;
        if idx + EOCD_LEN + comment_len == tail_len {
            found = Some(idx);
            break;
        }
    }
    let idx = found.ok_or_else(|| Error::Archive("end of central directory not found".to_owned()))?;

    let mut cur = Cursor::new(&tail[idx + 4..]);
    let _disk = cur.u16()?;
    let _cd_disk = cur.u16()?;
    let _disk_entries = cur.u16()?;
    let entries = cur.u16()? as u64;
    let cd_size = cur.u32()? as u64;
    let cd_offset = cur.u32()? as u64;

    let needs_zip64 =
        entries == 0xffff || cd_size == 0xffff_ffff || cd_offset == 0xffff_ffff;
    let eocd_pos = tail_start + idx as u64;
    if !needs_zip64 || eocd_pos < ZIP64_LOCATOR_LEN as u64 {
        return Ok(EndOfDirectory {
            entries,
            cd_size,
            cd_offset,
        });
    }

    let mut locator = [0u8; ZIP64_LOCATOR_LEN];
    read_exact_at(backing, eocd_pos - ZIP64_LOCATOR_LEN as u64, &mut locator).await?;
    let mut cur = Cursor::new(&locator);
    if cur.u32()? != ZIP64_LOCATOR_SIG {
        return Err(Error::Archive("zip64 locator not found".to_owned()));
    }
    let _disk = cur.u32()?;
    let zip64_eocd_offset = cur.u64()?;

    let mut record = [0u8; ZIP64_EOCD_LEN];
    read_exact_at(backing, zip64_eocd_offset, &mut record).await?;
    let mut cur = Cursor::new(&record);
    if cur.u32()? != ZIP64_EOCD_SIG {
        return Err(Error::Archive("zip64 end of central directory not found".to_owned()));
    }
    let _record_size = cur.u64()?;
    let _version_made = cur.u16()?;
    let _version_needed = cur.u16()?;
    let _disk = cur.u32()?;
    let _cd_disk = cur.u32()?;
    let _disk_entries = cur.u64()?;
    let entries = cur.u64()?;
    let cd_size = cur.u64()?;
    let cd_offset = cur.u64()?;
    Ok(EndOfDirectory {
        entries,
        cd_size,
        cd_offset,
    })
}

/// Parse the archive's central directory over a positioned reader.
pub async fn read_central_directory(
    backing: &dyn RandomAccess,
    size: u64,
) -> Result<Vec<ArchiveEntry>> {
    let end = find_end_of_directory(backing, size).await?;
    if end.cd_size > MAX_CENTRAL_DIR {
        return Err(Error::Archive("central directory too large".to_owned()));
    }
    let mut raw = vec![0u8; end.cd_size as usize];
    read_exact_at(backing, end.cd_offset, &mut raw).await?;

    let mut cur = Cursor::new(&raw);
    let mut entries = Vec::with_capacity(end.entries.min(1 << 20) as usize);
    for _ in 0..end.entries {
        if cur.u32()? != CENTRAL_HEADER_SIG {
            return Err(Error::Archive("bad central directory record".to_owned()));
        }
        let version_made = cur.u16()?;
        let _version_needed = cur.u16()?;
        let _flags = cur.u16()?;
        let method = CompressionMethod::from_code(cur.u16()?);
        let dos_time = cur.u16()?;
        let dos_date = cur.u16()?;
        let crc32 = cur.u32()?;
        let mut compressed_size = cur.u32()? as u64;
        let mut uncompressed_size = cur.u32()? as u64;
        let name_len = cur.u16()? as usize;
        let extra_len = cur.u16()? as usize;
        let comment_len = cur.u16()? as usize;
        let _disk = cur.u16()?;
        let _internal_attrs = cur.u16()?;
        let external_attrs = cur.u32()?;
        let mut header_offset = cur.u32()? as u64;
        let name = String::from_utf8_lossy(cur.bytes(name_len)?).into_owned();

        // zip64 extended information replaces any saturated 32-bit field
        let mut extra = Cursor::new(cur.bytes(extra_len)?);
        while extra.remaining() >= 4 {
            let id = extra.u16()?;
            let field_len = extra.u16()? as usize;
            let mut field = Cursor::new(extra.bytes(field_len)?);
            if id != 0x0001 {
                continue;
            }
            if uncompressed_size == 0xffff_ffff {
                uncompressed_size = field.u64()?;
            }
            if compressed_size == 0xffff_ffff {
                compressed_size = field.u64()?;
            }
            if header_offset == 0xffff_ffff {
                header_offset = field.u64()?;
            }
        }
        cur.bytes(comment_len)?;

        let unix_attrs = version_made >> 8 == 3;
        let mode = if unix_attrs {
            external_attrs >> 16
        } else if name.ends_with('/') {
            0o755
        } else {
            0o644
        };

        entries.push(ArchiveEntry {
            header: EntryHeader {
                name,
                method,
                crc32,
                compressed_size,
                uncompressed_size,
                modified: from_dos_time(dos_time, dos_date),
                mode,
            },
            header_offset,
        });
    }
    Ok(entries)
}

/// A decompressing stream over one archive entry. The optional lock guard
/// is released when the stream closes (or drops), not before.
pub struct EntryReader {
    backing: Arc<dyn RandomAccess>,
    info: FileInfo,
    data_offset: u64,
    compressed_size: u64,
    uncompressed_size: u64,
    expected_crc: u32,
    inflater: Option<Decompress>,
    crc: crc32fast::Hasher,
    in_buf: Vec<u8>,
    in_pos: usize,
    consumed: u64,
    produced: u64,
    verified: bool,
    guard: Option<LockGuard>,
}

impl EntryReader {
    pub(crate) async fn open(
        backing: Arc<dyn RandomAccess>,
        entry: &ArchiveEntry,
        guard: Option<LockGuard>,
    ) -> Result<Self> {
        let inflater = match entry.header.method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflated => Some(Decompress::new(false)),
            CompressionMethod::Other(code) => {
                return Err(Error::Archive(format!(
                    "cannot decompress '{}': unsupported method {code}",
                    entry.header.name
                )))
            }
        };
        let data_offset = entry.data_offset(backing.as_ref()).await?;
        Ok(Self {
            backing,
            info: entry.header.info(),
            data_offset,
            compressed_size: entry.header.compressed_size,
            uncompressed_size: entry.header.uncompressed_size,
            expected_crc: entry.header.crc32,
            inflater,
            crc: crc32fast::Hasher::new(),
            in_buf: Vec::new(),
            in_pos: 0,
            consumed: 0,
            produced: 0,
            verified: false,
            guard,
        })
    }

    fn verify_crc(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;
        let actual = self.crc.clone().finalize();
        if actual != self.expected_crc {
            return Err(Error::Archive(format!(
                "crc mismatch in '{}': {actual:08x} != {:08x}",
                self.info.name, self.expected_crc
            )));
        }
        Ok(())
    }

    async fn refill(&mut self) -> Result<()> {
        let remaining = self.compressed_size - self.consumed;
        let take = (READ_CHUNK as u64).min(remaining) as usize;
        self.in_buf.resize(take, 0);
        read_exact_at(
            self.backing.as_ref(),
            self.data_offset + self.consumed,
            &mut self.in_buf,
        )
        .await?;
        self.consumed += take as u64;
        self.in_pos = 0;
        Ok(())
    }
}

#[async_trait]
impl FileRead for EntryReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.produced == self.uncompressed_size {
            self.verify_crc()?;
            return Ok(0);
        }
        match self.inflater.as_mut() {
            None => {
                // stored entry, plain bounded reads
                let remaining = self.uncompressed_size - self.produced;
                let take = (buf.len() as u64).min(remaining) as usize;
                let n = self
                    .backing
                    .read_at(self.data_offset + self.produced, &mut buf[..take])
                    .await?;
                if n == 0 {
                    return Err(Error::Archive(format!(
                        "unexpected end of entry '{}'",
                        self.info.name
                    )));
                }
                self.crc.update(&buf[..n]);
                self.produced += n as u64;
                if self.produced == self.uncompressed_size {
                    self.verify_crc()?;
                }
                Ok(n)
            }
            Some(_) => loop {
                if self.in_pos == self.in_buf.len() && self.consumed < self.compressed_size {
                    self.refill().await?;
                }
                let inflater = self.inflater.as_mut().unwrap();
                let before_in = inflater.total_in();
                let before_out = inflater.total_out();
                let status = inflater
                    .decompress(&self.in_buf[self.in_pos..], buf, FlushDecompress::None)
                    .map_err(|err| {
                        Error::Archive(format!("inflate failed in '{}': {err}", self.info.name))
                    })?;
                let eaten = (inflater.total_in() - before_in) as usize;
                let wrote = (inflater.total_out() - before_out) as usize;
                self.in_pos += eaten;
                if wrote > 0 {
                    self.crc.update(&buf[..wrote]);
                    self.produced += wrote as u64;
                    if self.produced == self.uncompressed_size {
                        self.verify_crc()?;
                    }
                    return Ok(wrote);
                }
                match status {
                    Status::StreamEnd => {
                        if self.produced != self.uncompressed_size {
                            return Err(Error::Archive(format!(
                                "short entry '{}': {} != {}",
                                self.info.name, self.produced, self.uncompressed_size
                            )));
                        }
                        self.verify_crc()?;
                        return Ok(0);
                    }
                    _ if eaten == 0
                        && self.in_pos == self.in_buf.len()
                        && self.consumed == self.compressed_size =>
                    {
                        return Err(Error::Archive(format!(
                            "unexpected end of entry '{}'",
                            self.info.name
                        )));
                    }
                    _ => continue,
                }
            },
        }
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(self.info.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.guard.take();
        Ok(())
    }

    fn random_access(self: Box<Self>) -> MaybeRandomAccess {
        MaybeRandomAccess::Sequential(self)
    }
}

/// The still-compressed bytes of one entry, used for raw block copies.
pub struct RawEntryReader {
    backing: Arc<dyn RandomAccess>,
    info: FileInfo,
    data_offset: u64,
    compressed_size: u64,
    pos: u64,
    guard: Option<LockGuard>,
}

impl RawEntryReader {
    pub(crate) async fn open(
        backing: Arc<dyn RandomAccess>,
        entry: &ArchiveEntry,
        guard: Option<LockGuard>,
    ) -> Result<Self> {
        let data_offset = entry.data_offset(backing.as_ref()).await?;
        Ok(Self {
            backing,
            info: entry.header.info(),
            data_offset,
            compressed_size: entry.header.compressed_size,
            pos: 0,
            guard,
        })
    }
}

#[async_trait]
impl FileRead for RawEntryReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.compressed_size - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let take = (buf.len() as u64).min(remaining) as usize;
        let n = self
            .backing
            .read_at(self.data_offset + self.pos, &mut buf[..take])
            .await?;
        if n == 0 {
            return Err(Error::Archive(format!(
                "unexpected end of entry '{}'",
                self.info.name
            )));
        }
        self.pos += n as u64;
        Ok(n)
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(self.info.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.guard.take();
        Ok(())
    }

    fn random_access(self: Box<Self>) -> MaybeRandomAccess {
        MaybeRandomAccess::Sequential(self)
    }
}
