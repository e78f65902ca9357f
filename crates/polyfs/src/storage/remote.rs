// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::fs::{FileRead, FileSystem, FileWrite, MaybeRandomAccess, SharedFs};
use crate::info::{DirEntry, FileInfo};
use crate::{path, Error, Result};

/// Flat grace period for the response after the request body closes.
const CLOSE_GUARD: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, Default)]
pub struct RemoteOptions {
    /// Base URL of the partner server, e.g. `https://vfs.example:8443`.
    pub address: String,
    /// The mount name on the server (`/<vfs>/...` in every request).
    pub vfs: String,
    pub base_dir: String,
    /// Bearer token for JWT mode.
    pub token: Option<String>,
    /// Additional PEM trust anchor for the server certificate.
    pub ca_pem: Option<String>,
    /// Client certificate plus key, PEM, for mTLS mode.
    pub identity_pem: Option<String>,
    pub insecure: bool,
    /// Per-request deadline; unset means no HTTP-layer timeout.
    pub timeout: Option<Duration>,
}

/// A thin filesystem speaking the remote VFS wire protocol
/// (`GET|PUT|DELETE /<vfs>/<path>`).
#[derive(Clone)]
pub struct RemoteFs {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    client: reqwest::Client,
    address: String,
    vfs: String,
    dir: String,
    token: Option<String>,
    guard: Duration,
}

impl RemoteFs {
    pub fn connect(opts: RemoteOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if opts.insecure {
            tracing::warn!("accepting remote server certificates without verification");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = opts.ca_pem.as_deref() {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = opts.identity_pem.as_deref() {
            let identity = reqwest::Identity::from_pem(pem.as_bytes())?;
            builder = builder.identity(identity);
        }
        if let Some(timeout) = opts.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self {
            inner: Arc::new(RemoteInner {
                client,
                address: opts.address.trim_end_matches('/').to_owned(),
                vfs: opts.vfs,
                dir: opts.base_dir.trim_matches('/').to_owned(),
                token: opts.token,
                guard: opts.timeout.unwrap_or(Duration::ZERO) + CLOSE_GUARD,
            }),
        })
    }

    fn resolve(&self, name: &str) -> Result<String> {
        Ok(path::join(&self.inner.dir, &path::clean(name)?))
    }

    fn url(&self, rel: &str) -> String {
        format!("{}/{}/{rel}", self.inner.address, self.inner.vfs)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.inner.client.request(method, url);
        if let Some(token) = &self.inner.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn stat_rel(&self, rel: &str) -> Result<FileInfo> {
        let url = format!("{}?stat", self.url(rel));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|err| Error::new(format!("cannot stat '{url}': {err}")))?;
        check_status(resp.status(), rel)?;
        Ok(resp.json::<FileInfo>().await?)
    }
}

fn check_status(status: reqwest::StatusCode, name: &str) -> Result<()> {
    match status.as_u16() {
        200..=299 => Ok(()),
        404 => Err(Error::NotExist(name.to_owned())),
        409 => Err(Error::Exists(name.to_owned())),
        401 => Err(Error::Unauthorized(format!("no access to '{name}'"))),
        code => Err(Error::new(format!("'{name}': unexpected status {code}"))),
    }
}

impl fmt::Display for RemoteFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote(vfs://{}/{})", self.inner.vfs, self.inner.dir)
    }
}

#[async_trait]
impl FileSystem for RemoteFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let rel = self.resolve(name)?;
        let url = self.url(&rel);
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|err| Error::new(format!("cannot open '{url}': {err}")))?;
        check_status(resp.status(), &rel)?;
        Ok(Box::new(RemoteFileRead {
            stream: Box::pin(resp.bytes_stream()),
            chunk: Bytes::new(),
            fs: self.clone(),
            rel,
        }))
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        let rel = self.resolve(name)?;
        self.stat_rel(&rel).await
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let _ = name;
        Err(Error::NotImplemented { op: "read_dir" })
    }

    /// Streams the body through an in-process pipe: the caller writes
    /// lazily while the HTTP request consumes. Close waits for the
    /// response status.
    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let rel = self.resolve(name)?;
        let url = self.url(&rel);
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(8);
        let (done_tx, done_rx) = oneshot::channel();

        let req = self
            .request(reqwest::Method::PUT, &url)
            .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)));
        let rel_for_task = rel.clone();
        tokio::spawn(async move {
            let result = match req.send().await {
                Err(err) => Err(Error::new(format!(
                    "cannot create '{rel_for_task}': {err}"
                ))),
                Ok(resp) => check_status(resp.status(), &rel_for_task),
            };
            let _ = done_tx.send(result);
        });

        Ok(Box::new(RemoteFileWrite {
            tx: Some(tx),
            done: Some(done_rx),
            guard: self.inner.guard,
            rel,
        }))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let rel = self.resolve(name)?;
        let url = self.url(&rel);
        let resp = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|err| Error::new(format!("cannot remove '{url}': {err}")))?;
        check_status(resp.status(), &rel)
    }

    fn full_path(&self, name: &str) -> Result<String> {
        let rel = self.resolve(name)?;
        Ok(format!("vfs://{}/{rel}", self.inner.vfs))
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        let dir = self.resolve(dir)?;
        Ok(Arc::new(Self {
            inner: Arc::new(RemoteInner {
                client: self.inner.client.clone(),
                address: self.inner.address.clone(),
                vfs: self.inner.vfs.clone(),
                dir,
                token: self.inner.token.clone(),
                guard: self.inner.guard,
            }),
        }))
    }
}

struct RemoteFileRead {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send + Sync>>,
    chunk: Bytes,
    fs: RemoteFs,
    rel: String,
}

#[async_trait]
impl FileRead for RemoteFileRead {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        use bytes::Buf;
        use futures::StreamExt;
        while self.chunk.is_empty() {
            match self.stream.next().await {
                None => return Ok(0),
                Some(Err(err)) => {
                    return Err(Error::new(format!("cannot read '{}': {err}", self.rel)))
                }
                Some(Ok(chunk)) => self.chunk = chunk,
            }
        }
        let n = self.chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }

    async fn stat(&self) -> Result<FileInfo> {
        self.fs.stat_rel(&self.rel).await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn random_access(self: Box<Self>) -> MaybeRandomAccess {
        MaybeRandomAccess::Sequential(self)
    }
}

struct RemoteFileWrite {
    tx: Option<mpsc::Sender<std::io::Result<Bytes>>>,
    done: Option<oneshot::Receiver<Result<()>>>,
    guard: Duration,
    rel: String,
}

#[async_trait]
impl FileWrite for RemoteFileWrite {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::Invalid(format!("'{}' is closed", self.rel)));
        };
        if tx.send(Ok(Bytes::copy_from_slice(buf))).await.is_err() {
            // the request ended early; close will surface its status
            return Err(Error::new(format!(
                "request aborted while writing '{}'",
                self.rel
            )));
        }
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        let Some(done) = self.done.take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.guard, done).await {
            Err(_) => Err(Error::Timeout(format!(
                "waiting for response for '{}'",
                self.rel
            ))),
            Ok(Err(_)) => Err(Error::new(format!(
                "request for '{}' ended without a status",
                self.rel
            ))),
            Ok(Ok(result)) => result,
        }
    }
}
