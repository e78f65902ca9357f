// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use chrono::{DateTime, Utc};
use flate2::{Compress, Compression, FlushCompress, Status};

use super::types::*;
use crate::fs::{FileRead, FileWrite};
use crate::{Error, Result};

const OUT_CHUNK: usize = 32 * 1024;
const COPY_CHUNK: usize = 64 * 1024;

// written entries and offsets must stay below the zip64 thresholds
const LIMIT_32: u64 = 0xffff_ffff;

struct OpenEntry {
    name: String,
    method: CompressionMethod,
    modified: DateTime<Utc>,
    mode: u32,
    header_offset: u64,
    crc: crc32fast::Hasher,
    deflater: Option<Compress>,
    compressed: u64,
    uncompressed: u64,
}

struct CentralRecord {
    header: EntryHeader,
    header_offset: u64,
    flags: u16,
}

/// A streaming ZIP writer over a plain byte sink.
///
/// Entries written through [`begin_entry`](Self::begin_entry) are finalized
/// with data descriptors so nothing is ever seeked back; raw copies carry
/// their sizes up front. [`finish`](Self::finish) emits the central
/// directory; the sink itself is closed separately so layered sinks can
/// cascade their own shutdown.
pub struct ZipWriter {
    sink: Box<dyn FileWrite>,
    offset: u64,
    entries: Vec<CentralRecord>,
    current: Option<OpenEntry>,
    finished: bool,
}

impl ZipWriter {
    pub fn new(sink: Box<dyn FileWrite>) -> Self {
        Self {
            sink,
            offset: 0,
            entries: Vec::new(),
            current: None,
            finished: false,
        }
    }

    /// The name of the entry currently accepting data, if any.
    pub fn current_entry(&self) -> Option<&str> {
        self.current.as_ref().map(|cur| cur.name.as_str())
    }

    async fn put(&mut self, data: &[u8]) -> Result<()> {
        self.sink.write_all(data).await?;
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Start a new entry, finalizing any previous one.
    pub async fn begin_entry(
        &mut self,
        name: &str,
        modified: DateTime<Utc>,
        mode: u32,
        method: CompressionMethod,
    ) -> Result<()> {
        if self.finished {
            return Err(Error::Invalid("archive already finalized".to_owned()));
        }
        if name.is_empty() {
            return Err(Error::Invalid("empty entry name".to_owned()));
        }
        let deflater = match method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflated => Some(Compress::new(Compression::default(), false)),
            CompressionMethod::Other(code) => {
                return Err(Error::Invalid(format!(
                    "cannot compress with method {code}"
                )))
            }
        };
        self.finish_entry().await?;

        let header_offset = self.offset;
        let (dos_time, dos_date) = to_dos_time(&modified);
        let mut header = Vec::with_capacity(LOCAL_HEADER_BASE + name.len());
        header.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&20u16.to_le_bytes()); // version needed
        header.extend_from_slice(&(FLAG_DATA_DESCRIPTOR | FLAG_UTF8).to_le_bytes());
        header.extend_from_slice(&method.code().to_le_bytes());
        header.extend_from_slice(&dos_time.to_le_bytes());
        header.extend_from_slice(&dos_date.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // crc, in the descriptor
        header.extend_from_slice(&0u32.to_le_bytes()); // compressed size
        header.extend_from_slice(&0u32.to_le_bytes()); // uncompressed size
        header.extend_from_slice(&(name.len() as u16).to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // extra length
        header.extend_from_slice(name.as_bytes());
        self.put(&header).await?;

        self.current = Some(OpenEntry {
            name: name.to_owned(),
            method,
            modified,
            mode,
            header_offset,
            crc: crc32fast::Hasher::new(),
            deflater,
            compressed: 0,
            uncompressed: 0,
        });
        Ok(())
    }

    /// Append data to the currently open entry.
    pub async fn write_entry_data(&mut self, mut input: &[u8]) -> Result<()> {
        let mut out = vec![0u8; OUT_CHUNK];
        loop {
            let chunk;
            {
                let cur = self
                    .current
                    .as_mut()
                    .ok_or_else(|| Error::Invalid("no open entry".to_owned()))?;
                match cur.deflater.as_mut() {
                    None => {
                        cur.crc.update(input);
                        cur.uncompressed += input.len() as u64;
                        cur.compressed += input.len() as u64;
                        chunk = None;
                    }
                    Some(deflater) => {
                        if input.is_empty() {
                            return Ok(());
                        }
                        let before_in = deflater.total_in();
                        let before_out = deflater.total_out();
                        deflater
                            .compress(input, &mut out, FlushCompress::None)
                            .map_err(|err| Error::Invalid(format!("deflate failed: {err}")))?;
                        let eaten = (deflater.total_in() - before_in) as usize;
                        let wrote = (deflater.total_out() - before_out) as usize;
                        cur.crc.update(&input[..eaten]);
                        cur.uncompressed += eaten as u64;
                        cur.compressed += wrote as u64;
                        input = &input[eaten..];
                        chunk = Some(wrote);
                    }
                }
            }
            match chunk {
                None => {
                    // stored entry: bytes pass through unchanged
                    return self.put(input).await;
                }
                Some(wrote) => {
                    if wrote > 0 {
                        self.put(&out[..wrote]).await?;
                    }
                    if input.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Finalize the open entry: flush its compressor and write the data
    /// descriptor. A no-op when no entry is open.
    pub async fn finish_entry(&mut self) -> Result<()> {
        let Some(mut cur) = self.current.take() else {
            return Ok(());
        };
        if let Some(deflater) = cur.deflater.as_mut() {
            let mut out = vec![0u8; OUT_CHUNK];
            loop {
                let before_out = deflater.total_out();
                let status = deflater
                    .compress(&[], &mut out, FlushCompress::Finish)
                    .map_err(|err| Error::Invalid(format!("deflate failed: {err}")))?;
                let wrote = (deflater.total_out() - before_out) as usize;
                cur.compressed += wrote as u64;
                if wrote > 0 {
                    self.sink.write_all(&out[..wrote]).await?;
                    self.offset += wrote as u64;
                }
                if status == Status::StreamEnd {
                    break;
                }
            }
        }
        if cur.compressed > LIMIT_32 || cur.uncompressed > LIMIT_32 {
            return Err(Error::Invalid(format!(
                "entry '{}' exceeds the 4 GiB archive entry limit",
                cur.name
            )));
        }
        let crc32 = cur.crc.clone().finalize();
        let mut descriptor = Vec::with_capacity(16);
        descriptor.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
        descriptor.extend_from_slice(&crc32.to_le_bytes());
        descriptor.extend_from_slice(&(cur.compressed as u32).to_le_bytes());
        descriptor.extend_from_slice(&(cur.uncompressed as u32).to_le_bytes());
        self.put(&descriptor).await?;

        self.entries.push(CentralRecord {
            header: EntryHeader {
                name: cur.name,
                method: cur.method,
                crc32,
                compressed_size: cur.compressed,
                uncompressed_size: cur.uncompressed,
                modified: cur.modified,
                mode: cur.mode,
            },
            header_offset: cur.header_offset,
            flags: FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
        });
        Ok(())
    }

    /// Copy an entry verbatim: the header facts from the source plus its
    /// still-compressed bytes, avoiding any recompression.
    pub async fn raw_entry(
        &mut self,
        header: &EntryHeader,
        reader: &mut dyn FileRead,
    ) -> Result<()> {
        if self.finished {
            return Err(Error::Invalid("archive already finalized".to_owned()));
        }
        self.finish_entry().await?;
        if header.compressed_size > LIMIT_32 || header.uncompressed_size > LIMIT_32 {
            return Err(Error::Invalid(format!(
                "entry '{}' exceeds the 4 GiB archive entry limit",
                header.name
            )));
        }

        let header_offset = self.offset;
        let (dos_time, dos_date) = to_dos_time(&header.modified);
        let mut local = Vec::with_capacity(LOCAL_HEADER_BASE + header.name.len());
        local.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        local.extend_from_slice(&20u16.to_le_bytes());
        local.extend_from_slice(&FLAG_UTF8.to_le_bytes());
        local.extend_from_slice(&header.method.code().to_le_bytes());
        local.extend_from_slice(&dos_time.to_le_bytes());
        local.extend_from_slice(&dos_date.to_le_bytes());
        local.extend_from_slice(&header.crc32.to_le_bytes());
        local.extend_from_slice(&(header.compressed_size as u32).to_le_bytes());
        local.extend_from_slice(&(header.uncompressed_size as u32).to_le_bytes());
        local.extend_from_slice(&(header.name.len() as u16).to_le_bytes());
        local.extend_from_slice(&0u16.to_le_bytes());
        local.extend_from_slice(header.name.as_bytes());
        self.put(&local).await?;

        let mut copied = 0u64;
        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            copied += n as u64;
            self.put(&buf[..n]).await?;
        }
        if copied != header.compressed_size {
            return Err(Error::Archive(format!(
                "raw copy of '{}' produced {copied} bytes, expected {}",
                header.name, header.compressed_size
            )));
        }

        self.entries.push(CentralRecord {
            header: header.clone(),
            header_offset,
            flags: FLAG_UTF8,
        });
        Ok(())
    }

    /// Finalize any open entry and write the central directory. Does not
    /// close the sink.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finish_entry().await?;
        self.finished = true;

        let cd_offset = self.offset;
        if cd_offset > LIMIT_32 {
            return Err(Error::Invalid(
                "archive exceeds the 4 GiB directory offset limit".to_owned(),
            ));
        }
        let records = std::mem::take(&mut self.entries);
        for record in records.iter() {
            let header = &record.header;
            let (dos_time, dos_date) = to_dos_time(&header.modified);
            let mut external_attrs = header.mode << 16;
            if header.is_dir() {
                external_attrs |= 0x10; // DOS directory bit
            }
            let mut central = Vec::with_capacity(CENTRAL_HEADER_BASE + header.name.len());
            central.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
            central.extend_from_slice(&((3u16 << 8) | 20).to_le_bytes()); // unix, v2.0
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&record.flags.to_le_bytes());
            central.extend_from_slice(&header.method.code().to_le_bytes());
            central.extend_from_slice(&dos_time.to_le_bytes());
            central.extend_from_slice(&dos_date.to_le_bytes());
            central.extend_from_slice(&header.crc32.to_le_bytes());
            central.extend_from_slice(&(header.compressed_size as u32).to_le_bytes());
            central.extend_from_slice(&(header.uncompressed_size as u32).to_le_bytes());
            central.extend_from_slice(&(header.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra
            central.extend_from_slice(&0u16.to_le_bytes()); // comment
            central.extend_from_slice(&0u16.to_le_bytes()); // disk
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&external_attrs.to_le_bytes());
            central.extend_from_slice(&(record.header_offset as u32).to_le_bytes());
            central.extend_from_slice(header.name.as_bytes());
            self.put(&central).await?;
        }
        let cd_size = self.offset - cd_offset;

        if records.len() > 0xffff {
            return Err(Error::Invalid(
                "archive exceeds the 65535 entry limit".to_owned(),
            ));
        }
        let mut eocd = Vec::with_capacity(EOCD_BASE);
        eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes()); // disk
        eocd.extend_from_slice(&0u16.to_le_bytes()); // cd disk
        eocd.extend_from_slice(&(records.len() as u16).to_le_bytes());
        eocd.extend_from_slice(&(records.len() as u16).to_le_bytes());
        eocd.extend_from_slice(&(cd_size as u32).to_le_bytes());
        eocd.extend_from_slice(&(cd_offset as u32).to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes()); // comment
        self.put(&eocd).await?;
        Ok(())
    }

    /// Close the sink, cascading through every layered writer underneath.
    pub async fn close_sink(&mut self) -> Result<()> {
        self.sink.close().await
    }
}

const LOCAL_HEADER_BASE: usize = 30;
const CENTRAL_HEADER_BASE: usize = 46;
const EOCD_BASE: usize = 22;
