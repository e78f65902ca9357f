// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::checksum::{sidecar_line, DigestAlgorithm, DigestSink, Digests};
use crate::encrypt::{EncryptSink, KeyFile, KEY_SIZE};
use crate::factory::{ConstructorFuture, Factory};
use crate::fs::{FileRead, FileSystem, FileWrite, SharedFs};
use crate::info::{DirEntry, FileInfo};
use crate::kms;
use crate::storage::zip::ZipFs;
use crate::zipstream::{CompressionMethod, ZipWriter};
use crate::{path, Error, ErrorList, Result};

const BUFFER_SIZE: usize = 1024 * 1024;

/// Creates or updates a ZIP archive on a base filesystem.
///
/// When the target already exists, new content goes to `<target>.tmp` and
/// every entry of the old archive that was not overwritten is carried over
/// as a raw block copy (no recompression), so unchanged entries keep their
/// exact compressed bytes. Closing commits: central directory, layered
/// sink shutdown, temp-to-final rename, then digest/key side-cars.
pub struct ZipRwFs {
    state: Arc<Mutex<Pipeline>>,
    label: String,
}

struct Pipeline {
    base: SharedFs,
    name: String,
    tmp_name: String,
    source: Option<ZipFs>,
    writer: Option<ZipWriter>,
    new_files: Vec<String>,
    no_compression: bool,
    plain_digests: Option<Digests>,
    digests: Vec<DigestAlgorithm>,
    enc: Option<EncTwin>,
    closed: bool,
}

struct EncTwin {
    data_key: [u8; KEY_SIZE],
    aad: Vec<u8>,
    digests: Digests,
    kms_uri: String,
}

impl ZipRwFs {
    /// Open the rewrite pipeline for `name`, without side-car emission.
    pub async fn open(base: SharedFs, name: &str, no_compression: bool) -> Result<Self> {
        Self::build(base, name, no_compression, Vec::new(), None).await
    }

    /// Open the rewrite pipeline for `name`, emitting one `<name>.<alg>`
    /// digest side-car per configured algorithm on commit.
    pub async fn with_checksums(
        base: SharedFs,
        name: &str,
        no_compression: bool,
        algs: Vec<DigestAlgorithm>,
    ) -> Result<Self> {
        Self::build(base, name, no_compression, algs, None).await
    }

    /// Like [`with_checksums`](Self::with_checksums), additionally teeing
    /// every archive byte through AES-GCM into a `<name>.aes` twin whose
    /// data key is wrapped by the AEAD behind `kms_uri`.
    pub async fn with_encrypted_checksums(
        base: SharedFs,
        name: &str,
        no_compression: bool,
        algs: Vec<DigestAlgorithm>,
        kms_uri: &str,
    ) -> Result<Self> {
        Self::build(base, name, no_compression, algs, Some(kms_uri)).await
    }

    async fn build(
        base: SharedFs,
        name: &str,
        no_compression: bool,
        algs: Vec<DigestAlgorithm>,
        kms_uri: Option<&str>,
    ) -> Result<Self> {
        let name = path::clean(name)?;

        // an existing target is opened for raw copy and rewritten via .tmp
        let source = match ZipFs::open_from(base.as_ref(), &name).await {
            Ok(source) => Some(source),
            Err(err) if err.is_not_exist() => None,
            Err(err) => {
                return Err(Error::new(format!("cannot open archive '{name}': {err}")))
            }
        };
        let tmp_name = if source.is_some() {
            format!("{name}.tmp")
        } else {
            name.clone()
        };

        let raw = base
            .create(&tmp_name)
            .await
            .map_err(|err| Error::new(format!("cannot create archive '{tmp_name}': {err}")))?;
        let mut sink: Box<dyn FileWrite> = Box::new(BufferedWrite::new(raw));

        let enc = match kms_uri {
            None => None,
            Some(kms_uri) => {
                let aes_tmp = format!("{tmp_name}.aes");
                let aes_raw = base.create(&aes_tmp).await.map_err(|err| {
                    Error::new(format!("cannot create archive '{aes_tmp}': {err}"))
                })?;
                let aes_buffered: Box<dyn FileWrite> = Box::new(BufferedWrite::new(aes_raw));
                let (aes_digest_sink, aes_digests) = DigestSink::new(aes_buffered, &algs);
                let enc_sink = EncryptSink::new(Box::new(aes_digest_sink), name.as_bytes());
                let data_key = *enc_sink.data_key();
                sink = Box::new(TeeWrite {
                    primary: sink,
                    secondary: Box::new(enc_sink),
                });
                Some(EncTwin {
                    data_key,
                    aad: name.clone().into_bytes(),
                    digests: aes_digests,
                    kms_uri: kms_uri.to_owned(),
                })
            }
        };

        let plain_digests = if algs.is_empty() {
            None
        } else {
            let (digest_sink, handle) = DigestSink::new(sink, &algs);
            sink = Box::new(digest_sink);
            Some(handle)
        };

        let label = name.clone();
        Ok(Self {
            state: Arc::new(Mutex::new(Pipeline {
                base,
                name,
                tmp_name,
                source,
                writer: Some(ZipWriter::new(sink)),
                new_files: Vec::new(),
                no_compression,
                plain_digests,
                digests: algs,
                enc,
                closed: false,
            })),
            label,
        })
    }

    /// Whether any entry has been written through this pipeline.
    pub async fn has_changed(&self) -> bool {
        !self.state.lock().await.new_files.is_empty()
    }
}

impl fmt::Display for ZipRwFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zipRw({})", self.label)
    }
}

#[async_trait]
impl FileSystem for ZipRwFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let name = path::clean(name)?;
        let source = {
            let state = self.state.lock().await;
            if state.new_files.contains(&name) {
                return Err(Error::Invalid(format!(
                    "file '{name}' is not yet written to disk"
                )));
            }
            state.source.clone()
        };
        match source {
            Some(source) => source.open(&name).await,
            None => Err(Error::NotExist(name)),
        }
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        let name = path::clean(name)?;
        let source = {
            let state = self.state.lock().await;
            if state.new_files.contains(&name) {
                return Err(Error::Invalid(format!(
                    "file '{name}' is not yet written to disk"
                )));
            }
            state.source.clone()
        };
        match source {
            Some(source) => source.stat(&name).await,
            None => Err(Error::NotExist(name)),
        }
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let name = path::clean(name)?;
        let source = self.state.lock().await.source.clone();
        match source {
            Some(source) => source.read_dir(&name).await,
            None if name.is_empty() => Ok(Vec::new()),
            None => Err(Error::NotExist(name)),
        }
    }

    fn sub(&self, _dir: &str) -> Result<SharedFs> {
        Err(Error::NotImplemented { op: "sub" })
    }

    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let name = path::clean(name)?;
        if name.is_empty() {
            return Err(Error::InvalidPath(name));
        }
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Invalid(format!(
                "archive '{}' is already closed",
                state.name
            )));
        }
        let method = if state.no_compression {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let writer = state.writer.as_mut().expect("writer present until close");
        writer
            .begin_entry(&name, Utc::now(), 0o644, method)
            .await
            .map_err(|err| Error::new(format!("cannot create file '{name}': {err}")))?;
        if !state.new_files.contains(&name) {
            state.new_files.push(name.clone());
        }
        Ok(Box::new(EntrySink {
            state: self.state.clone(),
            name,
        }))
    }

    /// Commit point. Copies every unreplaced source entry raw, finishes
    /// the central directory, shuts the sink layers down inside-out, then
    /// renames the temporary into place and emits the side-car files.
    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let mut errs = ErrorList::new();

        // preserve unchanged entries as raw block copies
        let new_files = state.new_files.clone();
        let mut writer = state.writer.take();
        if let (Some(source), Some(writer)) = (state.source.clone(), writer.as_mut()) {
            let headers: Vec<_> = source
                .entries()
                .iter()
                .map(|entry| entry.header.clone())
                .collect();
            for header in headers {
                if new_files.contains(&header.name) {
                    continue;
                }
                let mut raw = match source.open_raw(&header.name).await {
                    Ok(raw) => raw,
                    Err(err) => {
                        errs.push(err);
                        break;
                    }
                };
                let copied = writer.raw_entry(&header, raw.as_mut()).await;
                errs.record(raw.close().await);
                if errs.record(copied).is_none() {
                    break;
                }
            }
        }

        // central directory, then the layered sinks from the inside out
        if let Some(mut writer) = writer {
            errs.record(writer.finish().await);
            errs.record(writer.close_sink().await);
        }
        if let Some(source) = state.source.take() {
            errs.record(source.close_archive().await);
        }

        let changed = !state.new_files.is_empty();
        let renamed = state.tmp_name != state.name;
        if errs.is_empty() && renamed {
            if changed {
                errs.record(state.base.remove(&state.name).await);
                errs.record(state.base.rename(&state.tmp_name, &state.name).await);
                if state.enc.is_some() {
                    let aes_tmp = format!("{}.aes", state.tmp_name);
                    let aes_name = format!("{}.aes", state.name);
                    match state.base.remove(&aes_name).await {
                        Ok(()) => {}
                        Err(err) if err.is_not_exist() => {}
                        Err(err) => errs.push(err),
                    }
                    errs.record(state.base.rename(&aes_tmp, &aes_name).await);
                }
            } else {
                errs.record(state.base.remove(&state.tmp_name).await);
                if state.enc.is_some() {
                    errs.record(state.base.remove(&format!("{}.aes", state.tmp_name)).await);
                }
            }
        }

        // side-cars are best effort: failures are reported but the rename
        // above is not undone
        if errs.is_empty() && changed {
            let file_name = path::base_name(&state.name).to_owned();
            if let Some(handle) = state.plain_digests.as_ref() {
                let digests = handle.get().unwrap_or_default();
                for alg in state.digests.clone() {
                    let Some(digest) = digests.get(&alg) else { continue };
                    let sidecar = format!("{}.{alg}", state.name);
                    let line = sidecar_line(digest, &file_name);
                    if let Err(err) = state.base.write_file(&sidecar, line.as_bytes()).await {
                        errs.push(Error::new(format!(
                            "cannot write sidecar file '{sidecar}': {err}"
                        )));
                    }
                }
            }
            if let Some(enc) = state.enc.as_ref() {
                match kms::resolve(&enc.kms_uri).await {
                    Err(err) => errs.push(Error::new(format!(
                        "cannot get KMS client for '{}': {err}",
                        enc.kms_uri
                    ))),
                    Ok(aead) => match aead.encrypt(&enc.data_key, &enc.aad).await {
                        Err(err) => errs.push(err),
                        Ok(wrapped) => {
                            let key_file = KeyFile::new(&wrapped, &enc.aad);
                            let key_name = format!("{}.aes.key.json", state.name);
                            match serde_json::to_vec(&key_file) {
                                Err(err) => errs.push(err.into()),
                                Ok(json) => {
                                    if let Err(err) =
                                        state.base.write_file(&key_name, &json).await
                                    {
                                        errs.push(Error::new(format!(
                                            "cannot write '{key_name}': {err}"
                                        )));
                                    }
                                }
                            }
                        }
                    },
                }
                let digests = enc.digests.get().unwrap_or_default();
                for alg in state.digests.clone() {
                    let Some(digest) = digests.get(&alg) else { continue };
                    let sidecar = format!("{}.aes.{alg}", state.name);
                    let line = sidecar_line(digest, &format!("{file_name}.aes"));
                    if let Err(err) = state.base.write_file(&sidecar, line.as_bytes()).await {
                        errs.push(Error::new(format!(
                            "cannot write sidecar file '{sidecar}': {err}"
                        )));
                    }
                }
            }
        }

        errs.finish()
    }
}

/// The sink handed out for one archive entry. Closing is a no-op: the ZIP
/// stream writer owns entry finalization, which happens when the next
/// entry starts or the archive closes.
struct EntrySink {
    state: Arc<Mutex<Pipeline>>,
    name: String,
}

#[async_trait]
impl FileWrite for EntrySink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let Some(writer) = state.writer.as_mut() else {
            return Err(Error::Invalid(format!(
                "archive closed while writing '{}'",
                self.name
            )));
        };
        if writer.current_entry() != Some(self.name.as_str()) {
            return Err(Error::Invalid(format!(
                "entry '{}' is no longer writable",
                self.name
            )));
        }
        writer.write_entry_data(buf).await?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A fixed-size write buffer in front of a slower sink.
struct BufferedWrite {
    inner: Box<dyn FileWrite>,
    buf: Vec<u8>,
}

impl BufferedWrite {
    fn new(inner: Box<dyn FileWrite>) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(BUFFER_SIZE),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            let data = std::mem::take(&mut self.buf);
            self.inner.write_all(&data).await?;
            self.buf = data;
            self.buf.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl FileWrite for BufferedWrite {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.buf.len() + buf.len() > BUFFER_SIZE {
            self.flush().await?;
        }
        if buf.len() >= BUFFER_SIZE {
            self.inner.write_all(buf).await?;
        } else {
            self.buf.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        let mut errs = ErrorList::new();
        errs.record(self.flush().await);
        errs.record(self.inner.close().await);
        errs.finish()
    }
}

/// Duplicates every byte into a parallel sink (the encrypted twin) while
/// forwarding to the primary chain.
struct TeeWrite {
    primary: Box<dyn FileWrite>,
    secondary: Box<dyn FileWrite>,
}

#[async_trait]
impl FileWrite for TeeWrite {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.secondary.write_all(buf).await?;
        self.primary.write_all(buf).await?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        let mut errs = ErrorList::new();
        errs.record(self.secondary.close().await);
        errs.record(self.primary.close().await);
        errs.finish()
    }
}

/// A factory constructor mounting any `*.zip` path as a rewrite pipeline
/// over the filesystem resolved for its parent.
pub fn create_fs_fn(no_compression: bool) -> impl Fn(Factory, String) -> ConstructorFuture {
    move |factory: Factory, zip_path: String| -> ConstructorFuture {
        Box::pin(async move {
            let parent = path::parent(&zip_path);
            if parent.is_empty() {
                return Err(Error::InvalidPath(zip_path.clone()));
            }
            let base = factory
                .get(parent)
                .await
                .map_err(|err| Error::new(format!("cannot get base filesystem for '{zip_path}': {err}")))?;
            let fs = ZipRwFs::open(base, path::base_name(&zip_path), no_compression).await?;
            Ok(Arc::new(fs) as SharedFs)
        })
    }
}

#[cfg(test)]
#[path = "./zipwrite_test.rs"]
mod zipwrite_test;
