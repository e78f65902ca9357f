// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

pub mod mux;
pub mod os;
pub mod remote;
pub mod s3;
pub mod sftp;
pub mod sub;
pub mod zip;
pub mod zipfolder;
pub mod zipwrite;

pub use mux::MuxFs;
pub use os::OsFs;
pub use remote::RemoteFs;
pub use s3::S3Fs;
pub use sftp::SftpFs;
pub use sub::SubFs;
pub use zip::ZipFs;
pub use zipfolder::ZipFolderFs;
pub use zipwrite::ZipRwFs;
