// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use russh::client;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::fs::{FileRead, FileSystem, FileWrite, MaybeRandomAccess, RandomAccess, SharedFs};
use crate::info::{DirEntry, FileInfo};
use crate::pool::{Pool, PoolGuard};
use crate::storage::sub::SubFs;
use crate::{path, Error, ErrorList, Result};

/// How long an operation waits for a free session before failing.
const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct SftpOptions {
    pub address: String,
    pub user: String,
    pub password: Option<String>,
    pub private_keys: Vec<PathBuf>,
    /// Known-hosts files with acceptable server keys. Empty means accept
    /// any server key (insecure).
    pub known_hosts: Vec<PathBuf>,
    pub base_dir: String,
    pub sessions: u32,
}

/// SFTP backend: one SSH connection carrying a fixed pool of multiplexed
/// SFTP sessions.
///
/// Metadata operations borrow a session and return it immediately; open
/// and create keep their session for the lifetime of the returned handle,
/// which bounds concurrency against the peer to the pool size.
#[derive(Clone)]
pub struct SftpFs {
    inner: Arc<SftpInner>,
}

struct SftpInner {
    handle: client::Handle<HostKeyCheck>,
    pool: Pool<Session>,
    address: String,
    user: String,
    base_dir: String,
}

struct Session {
    sftp: SftpSession,
    id: u32,
}

struct HostKeyCheck {
    allowed: Option<Vec<PublicKey>>,
}

impl client::Handler for HostKeyCheck {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.allowed {
            None => {
                tracing::warn!("accepting sftp server key without verification");
                Ok(true)
            }
            Some(keys) => Ok(keys.iter().any(|key| key == server_public_key)),
        }
    }
}

/// Parse the server keys out of known-hosts file content.
fn parse_known_hosts(content: &str) -> Vec<PublicKey> {
    let mut keys = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(_host), Some(algorithm), Some(blob)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if let Ok(key) = PublicKey::from_openssh(&format!("{algorithm} {blob}")) {
            keys.push(key);
        }
    }
    keys
}

fn attrs_to_info(name: &str, attrs: &FileAttributes) -> FileInfo {
    let modified = attrs
        .mtime
        .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
        .unwrap_or(chrono::DateTime::<Utc>::UNIX_EPOCH);
    FileInfo {
        name: name.to_owned(),
        size: attrs.size.unwrap_or(0),
        mode: attrs.permissions.unwrap_or(0),
        modified,
        is_dir: attrs.is_dir(),
    }
}

fn map_sftp_err(err: russh_sftp::client::error::Error, name: &str, op: &str) -> Error {
    if let russh_sftp::client::error::Error::Status(status) = &err {
        if status.status_code == StatusCode::NoSuchFile {
            return Error::NotExist(name.to_owned());
        }
    }
    Error::new(format!("cannot {op} '{name}': {err}"))
}

impl SftpFs {
    pub async fn connect(opts: SftpOptions) -> Result<Self> {
        let allowed = if opts.known_hosts.is_empty() {
            None
        } else {
            let mut keys = Vec::new();
            for file in &opts.known_hosts {
                let content = tokio::fs::read_to_string(file).await.map_err(|err| {
                    Error::io(format!("cannot read known hosts '{}'", file.display()), err)
                })?;
                keys.extend(parse_known_hosts(&content));
            }
            Some(keys)
        };

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(
            config,
            opts.address.as_str(),
            HostKeyCheck { allowed },
        )
        .await
        .map_err(|err| Error::new(format!("cannot connect to '{}': {err}", opts.address)))?;

        authenticate(&mut handle, &opts).await?;

        let mut sessions = Vec::new();
        for id in 0..opts.sessions.max(1) {
            tracing::debug!(session = id, "creating sftp session");
            let channel = handle.channel_open_session().await?;
            channel.request_subsystem(true, "sftp").await?;
            let sftp = SftpSession::new(channel.into_stream()).await?;
            sessions.push(Session { sftp, id });
        }

        Ok(Self {
            inner: Arc::new(SftpInner {
                handle,
                pool: Pool::new(sessions),
                address: opts.address,
                user: opts.user,
                base_dir: opts.base_dir.trim_end_matches('/').to_owned(),
            }),
        })
    }

    fn resolve(&self, name: &str) -> Result<String> {
        let name = path::clean(name)?;
        if self.inner.base_dir.is_empty() {
            return Ok(name);
        }
        Ok(path::join(&self.inner.base_dir, &name))
    }

    async fn session(&self) -> Result<PoolGuard<Session>> {
        self.inner.pool.acquire(SESSION_TIMEOUT).await
    }
}

async fn authenticate(handle: &mut client::Handle<HostKeyCheck>, opts: &SftpOptions) -> Result<()> {
    if opts.private_keys.is_empty() {
        let password = opts.password.clone().unwrap_or_default();
        let auth = handle
            .authenticate_password(opts.user.clone(), password)
            .await?;
        if !auth.success() {
            return Err(Error::Unauthorized(format!(
                "password rejected for user '{}'",
                opts.user
            )));
        }
        return Ok(());
    }
    for key_file in &opts.private_keys {
        let key = russh::keys::load_secret_key(key_file, opts.password.as_deref())
            .map_err(|err| {
                Error::new(format!("cannot parse key '{}': {err}", key_file.display()))
            })?;
        let fingerprint = key.public_key().fingerprint(HashAlg::Sha256);
        let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
        let auth = handle
            .authenticate_publickey(
                opts.user.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await?;
        if auth.success() {
            tracing::debug!(%fingerprint, "authenticated with private key");
            return Ok(());
        }
        tracing::debug!(%fingerprint, "private key rejected");
    }
    Err(Error::Unauthorized(format!(
        "no private key accepted for user '{}'",
        opts.user
    )))
}

impl fmt::Display for SftpFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sftp://{}@{}/{}",
            self.inner.user, self.inner.address, self.inner.base_dir
        )
    }
}

#[async_trait]
impl FileSystem for SftpFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let full = self.resolve(name)?;
        let session = self.session().await?;
        let file = match session
            .sftp
            .open_with_flags(full.clone(), OpenFlags::READ)
            .await
        {
            Ok(file) => file,
            // the session goes back to the pool when the guard drops
            Err(err) => return Err(map_sftp_err(err, name, "open")),
        };
        Ok(Box::new(SftpFileRead {
            file: Some(file),
            guard: Some(session),
            name: full,
        }))
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        let full = self.resolve(name)?;
        let session = self.session().await?;
        let attrs = session
            .sftp
            .metadata(full.clone())
            .await
            .map_err(|err| map_sftp_err(err, name, "stat"))?;
        Ok(attrs_to_info(path::base_name(&full), &attrs))
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let full = self.resolve(name)?;
        let session = self.session().await?;
        let dir = session
            .sftp
            .read_dir(full.clone())
            .await
            .map_err(|err| map_sftp_err(err, name, "read directory"))?;
        Ok(dir
            .map(|entry| {
                let info = attrs_to_info(&entry.file_name(), &entry.metadata());
                DirEntry::from_info(info)
            })
            .collect())
    }

    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let full = self.resolve(name)?;
        let session = self.session().await?;
        let file = match session
            .sftp
            .open_with_flags(
                full.clone(),
                OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE,
            )
            .await
        {
            Ok(file) => file,
            Err(err) => return Err(map_sftp_err(err, name, "create")),
        };
        Ok(Box::new(SftpFileWrite {
            file,
            _guard: session,
            name: full,
        }))
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let full = self.resolve(name)?;
        let session = self.session().await?;
        session
            .sftp
            .create_dir(full)
            .await
            .map_err(|err| map_sftp_err(err, name, "create directory"))
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_full = self.resolve(old_name)?;
        let new_full = self.resolve(new_name)?;
        let session = self.session().await?;
        session
            .sftp
            .rename(old_full, new_full)
            .await
            .map_err(|err| map_sftp_err(err, old_name, "rename"))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let full = self.resolve(name)?;
        let session = self.session().await?;
        match session.sftp.remove_file(full.clone()).await {
            Ok(()) => Ok(()),
            Err(russh_sftp::client::error::Error::Status(status))
                if status.status_code == StatusCode::NoSuchFile =>
            {
                Err(Error::NotExist(name.to_owned()))
            }
            Err(_) => session
                .sftp
                .remove_dir(full)
                .await
                .map_err(|err| map_sftp_err(err, name, "remove")),
        }
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        SubFs::new(Arc::new(self.clone()), dir).map(|sub| Arc::new(sub) as SharedFs)
    }

    /// Close the free queue and the underlying SSH connection. Operations
    /// issued after close fail to acquire a session.
    async fn close(&self) -> Result<()> {
        let mut errs = ErrorList::new();
        let idle = self.inner.pool.close().await;
        for session in idle {
            tracing::debug!(session = session.id, "dropping sftp session");
            drop(session);
        }
        if let Err(err) = self
            .inner
            .handle
            .disconnect(russh::Disconnect::ByApplication, "closing", "en")
            .await
        {
            errs.push(err.into());
        }
        errs.finish()
    }
}

struct SftpFileRead {
    file: Option<russh_sftp::client::fs::File>,
    guard: Option<PoolGuard<Session>>,
    name: String,
}

#[async_trait]
impl FileRead for SftpFileRead {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Err(Error::Invalid(format!("'{}' is closed", self.name)));
        };
        file.read(buf)
            .await
            .map_err(|err| Error::io(format!("cannot read '{}'", self.name), err))
    }

    async fn stat(&self) -> Result<FileInfo> {
        let Some(file) = self.file.as_ref() else {
            return Err(Error::Invalid(format!("'{}' is closed", self.name)));
        };
        let attrs = file
            .metadata()
            .await
            .map_err(|err| Error::new(format!("cannot stat '{}': {err}", self.name)))?;
        Ok(attrs_to_info(path::base_name(&self.name), &attrs))
    }

    async fn close(&mut self) -> Result<()> {
        let result = match self.file.take() {
            None => Ok(()),
            Some(mut file) => file
                .shutdown()
                .await
                .map_err(|err| Error::io(format!("cannot close '{}'", self.name), err)),
        };
        self.guard.take();
        result
    }

    fn random_access(self: Box<Self>) -> MaybeRandomAccess {
        match self.file {
            Some(file) => MaybeRandomAccess::Random(Arc::new(SftpRandomFile {
                file: Mutex::new(Some(file)),
                guard: StdMutex::new(self.guard),
                name: self.name,
            })),
            None => MaybeRandomAccess::Sequential(self),
        }
    }
}

/// Positioned reads over an SFTP file, serialized through an internal
/// mutex because the remote handle has a single cursor.
struct SftpRandomFile {
    file: Mutex<Option<russh_sftp::client::fs::File>>,
    guard: StdMutex<Option<PoolGuard<Session>>>,
    name: String,
}

#[async_trait]
impl RandomAccess for SftpRandomFile {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.file.lock().await;
        let Some(file) = file.as_mut() else {
            return Err(Error::Invalid(format!("'{}' is closed", self.name)));
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| Error::io(format!("cannot seek '{}'", self.name), err))?;
        file.read(buf)
            .await
            .map_err(|err| Error::io(format!("cannot read '{}'", self.name), err))
    }

    async fn close(&self) -> Result<()> {
        let result = match self.file.lock().await.take() {
            None => Ok(()),
            Some(mut file) => file
                .shutdown()
                .await
                .map_err(|err| Error::io(format!("cannot close '{}'", self.name), err)),
        };
        self.guard.lock().expect("guard poisoned").take();
        result
    }
}

struct SftpFileWrite {
    file: russh_sftp::client::fs::File,
    _guard: PoolGuard<Session>,
    name: String,
}

#[async_trait]
impl FileWrite for SftpFileWrite {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file
            .write(buf)
            .await
            .map_err(|err| Error::io(format!("cannot write '{}'", self.name), err))
    }

    async fn close(&mut self) -> Result<()> {
        self.file
            .shutdown()
            .await
            .map_err(|err| Error::io(format!("cannot close '{}'", self.name), err))
    }
}

#[cfg(test)]
#[path = "./sftp_test.rs"]
mod sftp_test;
