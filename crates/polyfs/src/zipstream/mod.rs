// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

//! ZIP container plumbing shared by the archive reader and the rewrite
//! pipeline: async central-directory parsing over positioned reads, and a
//! streaming writer that never seeks, so archives can be written straight
//! onto non-seekable sinks (an S3 upload, an HTTP body).

mod read;
mod types;
mod write;

pub use read::{read_central_directory, ArchiveEntry, EntryReader, RawEntryReader};
pub use types::{CompressionMethod, EntryHeader};
pub use write::ZipWriter;

#[cfg(test)]
#[path = "./zipstream_test.rs"]
mod zipstream_test;
