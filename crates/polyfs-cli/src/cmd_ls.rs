// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::path::PathBuf;

use clap::Parser;
use polyfs::config::Config;
use polyfs::{FileSystem, Result};

/// Recursively list a VFS path, descending into archives
#[derive(Debug, Parser)]
pub struct CmdLs {
    /// Configuration file (TOML)
    #[clap(long, short)]
    config: PathBuf,

    /// Path to list, e.g. vfs://data/folder
    path: String,
}

impl CmdLs {
    pub async fn run(&self) -> Result<i32> {
        let config = Config::load(&self.config)?;
        let mux = config.build_mux().await?;

        let result = mux
            .walk_dir(&self.path, &mut |path, entry| {
                if entry.is_dir() {
                    println!("[d] {path}");
                } else {
                    println!("[f] {path} [{}]", entry.info().size);
                }
                Ok(())
            })
            .await;

        mux.close().await?;
        result.map(|_| 0)
    }
}
