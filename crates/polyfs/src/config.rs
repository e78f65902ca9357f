// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fs::{FileSystem, SharedFs};
use crate::server::AuthMode;
use crate::storage::remote::RemoteOptions;
use crate::storage::s3::S3Options;
use crate::storage::sftp::SftpOptions;
use crate::storage::{MuxFs, OsFs, RemoteFs, S3Fs, SftpFs, ZipFolderFs};
use crate::{Error, Result};

/// One named virtual filesystem definition.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Vfs {
    Os(OsConfig),
    Sftp(SftpConfig),
    S3(S3Config),
    Remote(RemoteConfig),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OsConfig {
    pub base_dir: String,
    pub zip_as_folder_cache: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SftpConfig {
    pub address: String,
    pub user: String,
    pub password: Option<String>,
    pub private_keys: Vec<PathBuf>,
    pub known_hosts: Vec<PathBuf>,
    pub base_dir: String,
    pub sessions: u32,
    pub zip_as_folder_cache: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub use_ssl: bool,
    pub debug: bool,
    pub ca_pem: Option<String>,
    pub base_url: Option<String>,
    pub zip_as_folder_cache: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub address: String,
    pub base_dir: String,
    pub token: Option<String>,
    pub ca_pem: Option<String>,
    pub identity_pem: Option<String>,
    pub insecure: bool,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub external_addr: String,
    pub jwt_algs: Vec<String>,
    pub jwt_keys: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub vfs: HashMap<String, Vfs>,
    pub server: Option<ServerConfig>,
}

impl Config {
    /// Load from a TOML file plus `POLYFS_*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("POLYFS").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Build every configured backend and mount it under its name.
    pub async fn build_mux(&self) -> Result<MuxFs> {
        let mut mounts: HashMap<String, SharedFs> = HashMap::new();
        for (name, definition) in self.vfs.iter() {
            match build_one(name, definition).await {
                Ok(fs) => {
                    mounts.insert(name.clone(), fs);
                }
                Err(err) => {
                    // tear down whatever was already brought up
                    for (built, fs) in mounts.iter() {
                        if let Err(err) = fs.close().await {
                            tracing::warn!(vfs = %built, %err, "failed to close during teardown");
                        }
                    }
                    return Err(Error::new(format!("cannot create vfs '{name}': {err}")));
                }
            }
        }
        Ok(MuxFs::new(mounts))
    }

    /// The authentication mode for the HTTP server: JWT when algorithms
    /// are configured, mTLS SAN matching otherwise.
    pub fn auth_mode(&self) -> Result<AuthMode> {
        let Some(server) = &self.server else {
            return Err(Error::Invalid("no server section configured".to_owned()));
        };
        if server.jwt_algs.is_empty() {
            return Ok(AuthMode::MtlsSan);
        }
        let mut algorithms = Vec::new();
        for alg in &server.jwt_algs {
            let parsed = alg
                .parse::<jsonwebtoken::Algorithm>()
                .map_err(|_| Error::Invalid(format!("unknown jwt algorithm '{alg}'")))?;
            algorithms.push(parsed);
        }
        Ok(AuthMode::Jwt {
            algorithms,
            keys: server.jwt_keys.clone(),
        })
    }
}

async fn build_one(name: &str, definition: &Vfs) -> Result<SharedFs> {
    match definition {
        Vfs::Os(cfg) => {
            let fs = OsFs::new(&cfg.base_dir)?;
            wrap_zip_cache(Arc::new(fs), cfg.zip_as_folder_cache)
        }
        Vfs::Sftp(cfg) => {
            if cfg.sessions <= cfg.zip_as_folder_cache {
                return Err(Error::Invalid(format!(
                    "sftp sessions ({}) must be larger than zip_as_folder_cache ({})",
                    cfg.sessions, cfg.zip_as_folder_cache
                )));
            }
            let fs = SftpFs::connect(SftpOptions {
                address: cfg.address.clone(),
                user: cfg.user.clone(),
                password: cfg.password.clone(),
                private_keys: cfg.private_keys.clone(),
                known_hosts: cfg.known_hosts.clone(),
                base_dir: cfg.base_dir.clone(),
                sessions: cfg.sessions,
            })
            .await?;
            wrap_zip_cache(Arc::new(fs), cfg.zip_as_folder_cache)
        }
        Vfs::S3(cfg) => {
            let fs = S3Fs::connect(S3Options {
                endpoint: cfg.endpoint.clone(),
                access_key: cfg.access_key.clone(),
                secret_key: cfg.secret_key.clone(),
                region: cfg.region.clone(),
                use_ssl: cfg.use_ssl,
                debug: cfg.debug,
                ca_pem: cfg.ca_pem.clone(),
            })
            .await?;
            let fs: SharedFs = match cfg.base_url.as_deref() {
                None | Some("") => Arc::new(fs),
                Some(base_url) => fs.sub(base_url)?,
            };
            wrap_zip_cache(fs, cfg.zip_as_folder_cache)
        }
        Vfs::Remote(cfg) => {
            let fs = RemoteFs::connect(RemoteOptions {
                address: cfg.address.clone(),
                vfs: name.to_owned(),
                base_dir: cfg.base_dir.clone(),
                token: cfg.token.clone(),
                ca_pem: cfg.ca_pem.clone(),
                identity_pem: cfg.identity_pem.clone(),
                insecure: cfg.insecure,
                timeout: cfg.timeout_secs.map(Duration::from_secs),
            })?;
            Ok(Arc::new(fs))
        }
    }
}

fn wrap_zip_cache(fs: SharedFs, cache: u32) -> Result<SharedFs> {
    if cache == 0 {
        return Ok(fs);
    }
    Ok(Arc::new(ZipFolderFs::new(fs, cache as usize)?))
}

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;
