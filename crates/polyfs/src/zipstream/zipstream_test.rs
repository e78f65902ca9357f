// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use super::read::read_central_directory;
use super::*;
use crate::fixtures::{BufSink, MemFile, SharedBuf};
use crate::fs::{read_all, FileRead, MaybeRandomAccess, RandomAccess};
use crate::Error;

async fn build_archive(entries: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
    let buf = SharedBuf::new();
    let mut writer = ZipWriter::new(Box::new(BufSink::new(buf.clone())));
    for (name, data, method) in entries {
        writer
            .begin_entry(name, Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap(), 0o644, *method)
            .await
            .unwrap();
        writer.write_entry_data(data).await.unwrap();
    }
    writer.finish().await.unwrap();
    writer.close_sink().await.unwrap();
    buf.bytes()
}

fn backing(data: Vec<u8>) -> (Arc<dyn RandomAccess>, u64) {
    let size = data.len() as u64;
    match Box::new(MemFile::new("test.zip", data)).random_access() {
        MaybeRandomAccess::Random(ra) => (ra, size),
        MaybeRandomAccess::Sequential(_) => unreachable!(),
    }
}

async fn read_entry(ra: &Arc<dyn RandomAccess>, entry: &ArchiveEntry) -> Vec<u8> {
    let mut reader = EntryReader::open(ra.clone(), entry, None).await.unwrap();
    let data = read_all(&mut reader).await.unwrap();
    reader.close().await.unwrap();
    data
}

#[tokio::test]
async fn test_round_trip_deflate_and_stored() {
    let big: Vec<u8> = (0..200_000).map(|i| (i % 7) as u8).collect();
    let archive = build_archive(&[
        ("a/content.txt", &vec![b'a'; 1000], CompressionMethod::Deflated),
        ("b/data.bin", &big, CompressionMethod::Stored),
        ("empty.txt", b"", CompressionMethod::Deflated),
    ])
    .await;

    // a local header leads, the end record trails
    assert_eq!(&archive[..4], &0x04034b50u32.to_le_bytes());
    let eocd = archive.len() - 22;
    assert_eq!(&archive[eocd..eocd + 4], &0x06054b50u32.to_le_bytes());

    let (ra, size) = backing(archive);
    let entries = read_central_directory(ra.as_ref(), size).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].header.name, "a/content.txt");
    assert_eq!(entries[0].header.uncompressed_size, 1000);
    assert!(entries[0].header.compressed_size < 1000);
    assert_eq!(entries[1].header.name, "b/data.bin");
    assert_eq!(entries[1].header.compressed_size, big.len() as u64);

    assert_eq!(read_entry(&ra, &entries[0]).await, vec![b'a'; 1000]);
    assert_eq!(read_entry(&ra, &entries[1]).await, big);
    assert_eq!(read_entry(&ra, &entries[2]).await, b"");
}

#[tokio::test]
async fn test_entry_info() {
    let archive = build_archive(&[("dir/file.txt", b"12345", CompressionMethod::Deflated)]).await;
    let (ra, size) = backing(archive);
    let entries = read_central_directory(ra.as_ref(), size).await.unwrap();
    let info = entries[0].header.info();
    assert_eq!(info.name, "file.txt");
    assert_eq!(info.size, 5);
    assert!(!info.is_dir);
    assert_eq!(info.mode, 0o644);
    assert_eq!(
        info.modified,
        Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap()
    );
}

#[tokio::test]
async fn test_raw_copy_preserves_compressed_bytes() {
    let payload: Vec<u8> = (0..50_000).map(|i| (i % 13) as u8).collect();
    let first = build_archive(&[("keep.bin", &payload, CompressionMethod::Deflated)]).await;

    let (ra, size) = backing(first);
    let entries = read_central_directory(ra.as_ref(), size).await.unwrap();
    let keep = &entries[0];
    let source_offset = keep.data_offset(ra.as_ref()).await.unwrap();
    let mut source_bytes = vec![0u8; keep.header.compressed_size as usize];
    crate::fs::read_exact_at(ra.as_ref(), source_offset, &mut source_bytes)
        .await
        .unwrap();

    // rebuild: raw-copy the old entry, then add a fresh one
    let buf = SharedBuf::new();
    let mut writer = ZipWriter::new(Box::new(BufSink::new(buf.clone())));
    let mut raw = RawEntryReader::open(ra.clone(), keep, None).await.unwrap();
    writer.raw_entry(&keep.header, &mut raw).await.unwrap();
    raw.close().await.unwrap();
    writer
        .begin_entry("new.txt", Utc::now(), 0o644, CompressionMethod::Deflated)
        .await
        .unwrap();
    writer.write_entry_data(b"fresh").await.unwrap();
    writer.finish().await.unwrap();
    writer.close_sink().await.unwrap();

    let (ra2, size2) = backing(buf.bytes());
    let entries2 = read_central_directory(ra2.as_ref(), size2).await.unwrap();
    assert_eq!(entries2.len(), 2);
    let copied = &entries2[0];
    assert_eq!(copied.header.name, "keep.bin");
    assert_eq!(copied.header.crc32, keep.header.crc32);
    assert_eq!(copied.header.compressed_size, keep.header.compressed_size);

    let copied_offset = copied.data_offset(ra2.as_ref()).await.unwrap();
    let mut copied_bytes = vec![0u8; copied.header.compressed_size as usize];
    crate::fs::read_exact_at(ra2.as_ref(), copied_offset, &mut copied_bytes)
        .await
        .unwrap();
    assert_eq!(copied_bytes, source_bytes, "compressed bytes must survive verbatim");

    assert_eq!(read_entry(&ra2, &entries2[0]).await, payload);
    assert_eq!(read_entry(&ra2, &entries2[1]).await, b"fresh");
}

#[tokio::test]
async fn test_corrupt_archive_is_rejected() {
    let (ra, size) = backing(b"this is not an archive at all".to_vec());
    assert!(matches!(
        read_central_directory(ra.as_ref(), size).await,
        Err(Error::Archive(_))
    ));
}

#[tokio::test]
async fn test_corrupt_entry_fails_crc() {
    let mut archive =
        build_archive(&[("data.bin", &[0u8; 4096], CompressionMethod::Stored)]).await;
    // flip one payload byte; stored entries start right after the 30+8 byte header
    archive[40] ^= 0xff;
    let (ra, size) = backing(archive);
    let entries = read_central_directory(ra.as_ref(), size).await.unwrap();
    let mut reader = EntryReader::open(ra.clone(), &entries[0], None).await.unwrap();
    let result = read_all(&mut reader).await;
    assert!(matches!(result, Err(Error::Archive(_))));
}

#[test]
fn test_dos_time_round_trip() {
    let dt = Utc.with_ymd_and_hms(2031, 12, 3, 23, 59, 58).unwrap();
    let (time, date) = super::types::to_dos_time(&dt);
    assert_eq!(super::types::from_dos_time(time, date), dt);

    // pre-epoch timestamps clamp to the DOS epoch
    let old = Utc.with_ymd_and_hms(1969, 1, 1, 0, 0, 0).unwrap();
    let (time, date) = super::types::to_dos_time(&old);
    assert_eq!(
        super::types::from_dos_time(time, date),
        Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0).unwrap()
    );
}
