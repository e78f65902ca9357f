// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::path::PathBuf;

use clap::Parser;
use polyfs::config::Config;
use polyfs::{fs, FileSystem, Result};

/// Stream one VFS file into another
#[derive(Debug, Parser)]
pub struct CmdCopy {
    /// Configuration file (TOML)
    #[clap(long, short)]
    config: PathBuf,

    /// Source path, e.g. vfs://data/in.bin
    src: String,

    /// Destination path, e.g. vfs://backup/out.bin
    dst: String,
}

impl CmdCopy {
    pub async fn run(&self) -> Result<i32> {
        let config = Config::load(&self.config)?;
        let mux = config.build_mux().await?;

        let result = fs::copy_path(&mux, &self.src, &self.dst).await;
        mux.close().await?;

        let copied = result?;
        tracing::info!(%copied, src = %self.src, dst = %self.dst, "copied");
        Ok(0)
    }
}
