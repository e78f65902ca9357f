// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use polyfs::config::Config;
use polyfs::server::{self, VfsServer};
use polyfs::{Error, FileSystem, Result, SharedFs};

/// Expose the configured virtual filesystems over HTTP
#[derive(Debug, Parser)]
pub struct CmdServe {
    /// Configuration file (TOML)
    #[clap(long, short)]
    config: PathBuf,
}

impl CmdServe {
    pub async fn run(&self) -> Result<i32> {
        let config = Config::load(&self.config)?;
        let auth = config.auth_mode()?;
        let listen_addr = config
            .server
            .as_ref()
            .map(|server| server.listen_addr.clone())
            .filter(|addr| !addr.is_empty())
            .ok_or_else(|| Error::Invalid("no listen address configured".to_owned()))?;

        let mux = Arc::new(config.build_mux().await?);
        let shared: SharedFs = mux.clone();
        let server = Arc::new(VfsServer::new(shared, auth));

        let listener = tokio::net::TcpListener::bind(&listen_addr)
            .await
            .map_err(|err| Error::io(format!("cannot listen on '{listen_addr}'"), err))?;
        tracing::info!(%listen_addr, "serving");

        let result = tokio::select! {
            result = server::serve(listener, server) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        };
        mux.close().await?;
        result.map(|_| 0)
    }
}
