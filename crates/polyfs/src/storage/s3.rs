// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
    CreateBucketConfiguration,
};
use aws_sdk_s3::Client;
use bytes::{Buf, Bytes};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::fs::{FileRead, FileSystem, FileWrite, MaybeRandomAccess, RandomAccess, SharedFs};
use crate::info::{DirEntry, FileInfo};
use crate::storage::sub::SubFs;
use crate::{path, Error, Result};

/// Upload part size for the streaming create sink.
const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct S3Options {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub use_ssl: bool,
    pub debug: bool,
    /// `"ignore"` asks for certificate verification to be skipped; any
    /// other nonempty value is a PEM trust anchor.
    pub ca_pem: Option<String>,
}

/// S3 backend. Paths have the shape `<bucket>[/<key>]`; the empty path
/// names the account root, where listing returns the buckets.
#[derive(Clone)]
pub struct S3Fs {
    inner: Arc<S3Inner>,
}

struct S3Inner {
    client: Client,
    endpoint: String,
    region: String,
    debug: bool,
}

fn split_bucket(name: &str) -> Result<(String, String)> {
    let name = path::clean(name)?;
    match name.split_once('/') {
        None => Ok((name, String::new())),
        Some((bucket, key)) => Ok((bucket.to_owned(), key.to_owned())),
    }
}

fn aws_time(time: Option<&AwsDateTime>) -> DateTime<Utc> {
    time.and_then(|t| Utc.timestamp_opt(t.secs(), t.subsec_nanos()).single())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl S3Fs {
    pub async fn connect(opts: S3Options) -> Result<Self> {
        let scheme = if opts.use_ssl { "https" } else { "http" };
        let endpoint_url = if opts.endpoint.contains("://") {
            opts.endpoint.clone()
        } else {
            format!("{scheme}://{}", opts.endpoint)
        };

        let credentials = Credentials::new(
            opts.access_key.clone(),
            opts.secret_key.clone(),
            None,
            None,
            "static",
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(opts.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(endpoint_url);

        match opts.ca_pem.as_deref() {
            None | Some("") => {}
            Some("ignore") => {
                // the SDK has no insecure switch; flag it rather than fail
                tracing::warn!(
                    "ca_pem = \"ignore\" requested, but certificate verification cannot be disabled; using system roots"
                );
            }
            Some(pem) => {
                use aws_smithy_http_client::{tls, Builder as HttpClientBuilder};
                let trust_store = tls::TrustStore::empty().with_pem_certificate(pem.as_bytes());
                let tls_context = tls::TlsContext::builder()
                    .with_trust_store(trust_store)
                    .build()
                    .map_err(|err| Error::new(format!("cannot load ca_pem trust anchor: {err}")))?;
                let http_client = HttpClientBuilder::new()
                    .tls_provider(tls::Provider::Rustls(
                        tls::rustls_provider::CryptoMode::Ring,
                    ))
                    .tls_context(tls_context)
                    .build_https();
                loader = loader.http_client(http_client);
            }
        }

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();
        Ok(Self {
            inner: Arc::new(S3Inner {
                client: Client::from_conf(config),
                endpoint: opts.endpoint,
                region: opts.region,
                debug: opts.debug,
            }),
        })
    }

    fn trace(&self, op: &str, name: &str) {
        if self.inner.debug {
            tracing::debug!(backend = %self, op, name, "s3 operation");
        }
    }

    /// Whether any object exists under the given prefix, making the path a
    /// synthetic directory.
    async fn has_content(&self, bucket: &str, key: &str) -> bool {
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };
        let mut req = self
            .inner
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(1);
        if !prefix.is_empty() {
            req = req.prefix(prefix);
        }
        match req.send().await {
            Ok(out) => out.key_count().unwrap_or(0) > 0 || !out.contents().is_empty(),
            Err(_) => false,
        }
    }
}

impl fmt::Display for S3Fs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3({})", self.inner.endpoint)
    }
}

#[async_trait]
impl FileSystem for S3Fs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        let (bucket, key) = split_bucket(name)?;
        self.trace("open", name);
        let out = self
            .inner
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Error::NotExist(name.to_owned())
                } else {
                    Error::new(format!("cannot open '{name}': {err}"))
                }
            })?;
        let size = out.content_length().unwrap_or(0).max(0) as u64;
        let info = FileInfo::new_file(
            path::base_name(&key),
            size,
            0,
            aws_time(out.last_modified()),
        );
        Ok(Box::new(S3FileRead {
            body: out.body,
            chunk: Bytes::new(),
            info,
            client: self.inner.client.clone(),
            bucket,
            key,
        }))
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        let (bucket, key) = split_bucket(name)?;
        self.trace("stat", name);
        if bucket.is_empty() {
            return Ok(FileInfo::new_dir(""));
        }
        if key.is_empty() {
            return if self.has_content(&bucket, "").await {
                Ok(FileInfo::new_dir(&bucket))
            } else {
                Err(Error::NotExist(name.to_owned()))
            };
        }
        match self
            .inner
            .client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(out) => Ok(FileInfo::new_file(
                path::base_name(&key),
                out.content_length().unwrap_or(0).max(0) as u64,
                0,
                aws_time(out.last_modified()),
            )),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if !not_found {
                    return Err(Error::new(format!("cannot stat '{name}': {err}")));
                }
                // a prefix with descendants presents as a directory
                if self.has_content(&bucket, &key).await {
                    Ok(FileInfo::new_dir(path::base_name(&key)))
                } else {
                    Err(Error::NotExist(name.to_owned()))
                }
            }
        }
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let (bucket, key) = split_bucket(name)?;
        self.trace("read_dir", name);
        if bucket.is_empty() {
            let out = self
                .inner
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|err| Error::new(format!("cannot list buckets: {err}")))?;
            return Ok(out
                .buckets()
                .iter()
                .filter_map(|b| b.name())
                .map(DirEntry::new_dir)
                .collect());
        }

        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .inner
                .client
                .list_objects_v2()
                .bucket(&bucket)
                .delimiter("/");
            if !prefix.is_empty() {
                req = req.prefix(&prefix);
            }
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let out = req
                .send()
                .await
                .map_err(|err| Error::new(format!("cannot read '{name}': {err}")))?;
            for common in out.common_prefixes() {
                if let Some(sub) = common.prefix() {
                    let sub = sub.strip_prefix(&prefix).unwrap_or(sub).trim_matches('/');
                    if !sub.is_empty() {
                        entries.push(DirEntry::new_dir(sub));
                    }
                }
            }
            for object in out.contents() {
                let Some(object_key) = object.key() else { continue };
                let rest = object_key.strip_prefix(&prefix).unwrap_or(object_key);
                if rest.is_empty() {
                    continue; // the directory marker itself
                }
                entries.push(DirEntry::from_info(FileInfo::new_file(
                    rest,
                    object.size().unwrap_or(0).max(0) as u64,
                    0,
                    aws_time(object.last_modified()),
                )));
            }
            if out.is_truncated().unwrap_or(false) {
                continuation = out.next_continuation_token().map(str::to_owned);
            } else {
                break;
            }
        }
        Ok(entries)
    }

    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let (bucket, key) = split_bucket(name)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(Error::InvalidPath(name.to_owned()));
        }
        self.trace("create", name);

        let (part_tx, part_rx) = mpsc::channel::<Vec<u8>>(2);
        let (done_tx, done_rx) = oneshot::channel();
        let failed = Arc::new(StdMutex::new(None));
        let failure_slot = failed.clone();
        let client = self.inner.client.clone();
        let upload_name = name.to_owned();
        tokio::spawn(async move {
            let result = upload(&client, &bucket, &key, part_rx).await;
            if let Err(err) = &result {
                tracing::error!(name = %upload_name, %err, "s3 upload failed");
                *failure_slot.lock().expect("slot poisoned") = Some(err.to_string());
            }
            let _ = done_tx.send(result);
        });

        Ok(Box::new(S3FileWrite {
            tx: Some(part_tx),
            buf: Vec::with_capacity(PART_SIZE.min(64 * 1024)),
            done: Some(done_rx),
            failed,
            name: name.to_owned(),
        }))
    }

    /// Creating a directory only works for a bare bucket name; object
    /// storage has no intermediate directories.
    async fn mkdir(&self, name: &str) -> Result<()> {
        let (bucket, key) = split_bucket(name)?;
        if !key.is_empty() {
            return Err(Error::Invalid(format!(
                "cannot create bucket with subfolders '{name}'"
            )));
        }
        self.trace("mkdir", name);
        let mut req = self.inner.client.create_bucket().bucket(&bucket);
        if !self.inner.region.is_empty() && self.inner.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(
                        self.inner.region.as_str(),
                    ))
                    .build(),
            );
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|err| Error::new(format!("cannot create bucket '{bucket}': {err}")))
    }

    /// Emulated: stream the source into the destination. Not atomic, and
    /// the source object is left in place.
    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.trace("rename", old_name);
        match self.stat(new_name).await {
            Err(err) if err.is_not_exist() => {}
            Err(err) => return Err(err),
            Ok(_) => self.remove(new_name).await?,
        }
        crate::fs::copy_path(self, old_name, new_name).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let (bucket, key) = split_bucket(name)?;
        self.trace("remove", name);
        self.inner
            .client
            .delete_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| Error::new(format!("cannot remove '{name}': {err}")))
    }

    async fn walk_dir(
        &self,
        name: &str,
        visit: crate::fs::WalkVisitor<'_>,
    ) -> Result<()> {
        let (bucket, key) = split_bucket(name)?;
        self.trace("walk_dir", name);
        let buckets = if bucket.is_empty() {
            let out = self
                .inner
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|err| Error::new(format!("cannot list buckets: {err}")))?;
            out.buckets()
                .iter()
                .filter_map(|b| b.name().map(str::to_owned))
                .collect()
        } else {
            vec![bucket]
        };

        for bucket in buckets {
            let mut continuation: Option<String> = None;
            loop {
                let mut req = self.inner.client.list_objects_v2().bucket(&bucket);
                if !key.is_empty() {
                    req = req.prefix(&key);
                }
                if let Some(token) = &continuation {
                    req = req.continuation_token(token);
                }
                let out = req
                    .send()
                    .await
                    .map_err(|err| Error::new(format!("cannot walk '{name}': {err}")))?;
                for object in out.contents() {
                    let Some(object_key) = object.key() else { continue };
                    let full = format!("{bucket}/{object_key}");
                    let entry = DirEntry::from_info(FileInfo::new_file(
                        path::base_name(object_key),
                        object.size().unwrap_or(0).max(0) as u64,
                        0,
                        aws_time(object.last_modified()),
                    ));
                    visit(&full, &entry)?;
                }
                if out.is_truncated().unwrap_or(false) {
                    continuation = out.next_continuation_token().map(str::to_owned);
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        SubFs::new(Arc::new(self.clone()), dir).map(|sub| Arc::new(sub) as SharedFs)
    }
}

/// Drive the background upload for one created object: a single
/// `PutObject` for bodies that fit in one part, multipart otherwise. The
/// terminal status reaches the sink through the one-shot it holds.
async fn upload(
    client: &Client,
    bucket: &str,
    key: &str,
    mut parts: mpsc::Receiver<Vec<u8>>,
) -> Result<()> {
    let wrap = |err: String| Error::new(format!("cannot upload '{bucket}/{key}': {err}"));

    let Some(first) = parts.recv().await else {
        // empty object
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(Vec::new()))
            .send()
            .await
            .map_err(|err| wrap(err.to_string()))?;
        return Ok(());
    };
    let Some(second) = parts.recv().await else {
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(first))
            .send()
            .await
            .map_err(|err| wrap(err.to_string()))?;
        return Ok(());
    };

    let created = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|err| wrap(err.to_string()))?;
    let upload_id = created
        .upload_id()
        .ok_or_else(|| wrap("missing upload id".to_owned()))?
        .to_owned();

    let result = async {
        let mut completed = Vec::new();
        let mut part_number = 0i32;
        let mut pending = vec![first, second];
        loop {
            for body in pending.drain(..) {
                part_number += 1;
                let out = client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|err| wrap(err.to_string()))?;
                completed.push(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(out.e_tag().map(str::to_owned))
                        .build(),
                );
            }
            match parts.recv().await {
                Some(body) => pending.push(body),
                None => break,
            }
        }
        client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| wrap(err.to_string()))?;
        Ok(())
    }
    .await;

    if result.is_err() {
        let abort = client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .send()
            .await;
        if let Err(err) = abort {
            tracing::warn!(%bucket, %key, %err, "failed to abort multipart upload");
        }
    }
    result
}

struct S3FileRead {
    body: ByteStream,
    chunk: Bytes,
    info: FileInfo,
    client: Client,
    bucket: String,
    key: String,
}

#[async_trait]
impl FileRead for S3FileRead {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        while self.chunk.is_empty() {
            match self.body.try_next().await {
                Ok(Some(chunk)) => self.chunk = chunk,
                Ok(None) => return Ok(0),
                Err(err) => {
                    return Err(Error::new(format!(
                        "cannot read '{}/{}': {err}",
                        self.bucket, self.key
                    )))
                }
            }
        }
        let n = self.chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(self.info.clone())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn random_access(self: Box<Self>) -> MaybeRandomAccess {
        // ranged requests replace the already-open stream
        MaybeRandomAccess::Random(Arc::new(S3RandomRead {
            client: self.client,
            bucket: self.bucket,
            key: self.key,
            size: self.info.size,
        }))
    }
}

/// Positioned reads as ranged `GetObject` requests.
struct S3RandomRead {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
}

#[async_trait]
impl RandomAccess for S3RandomRead {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64).min(self.size) - 1;
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(|err| {
                Error::new(format!("cannot read '{}/{}': {err}", self.bucket, self.key))
            })?;
        let data = out.body.collect().await.map_err(|err| {
            Error::new(format!("cannot read '{}/{}': {err}", self.bucket, self.key))
        })?;
        let data = data.into_bytes();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct S3FileWrite {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    buf: Vec<u8>,
    done: Option<oneshot::Receiver<Result<()>>>,
    failed: Arc<StdMutex<Option<String>>>,
    name: String,
}

impl S3FileWrite {
    fn failure(&self) -> Option<Error> {
        self.failed
            .lock()
            .expect("slot poisoned")
            .as_ref()
            .map(|msg| Error::new(msg.clone()))
    }
}

#[async_trait]
impl FileWrite for S3FileWrite {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // fail fast once the background upload has reported an error
        if let Some(err) = self.failure() {
            return Err(err);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::Invalid(format!("'{}' is closed", self.name)));
        };
        self.buf.extend_from_slice(buf);
        if self.buf.len() >= PART_SIZE {
            let part = std::mem::take(&mut self.buf);
            if tx.send(part).await.is_err() {
                return Err(self.failure().unwrap_or_else(|| {
                    Error::new(format!("upload of '{}' aborted", self.name))
                }));
            }
        }
        Ok(buf.len())
    }

    /// Flush the tail, signal end of stream, and wait for the uploader's
    /// terminal status.
    async fn close(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        if !self.buf.is_empty() {
            let part = std::mem::take(&mut self.buf);
            let _ = tx.send(part).await;
        }
        drop(tx);
        match self.done.take() {
            None => Ok(()),
            Some(done) => match done.await {
                Ok(result) => result,
                Err(_) => Err(self.failure().unwrap_or_else(|| {
                    Error::new(format!("upload of '{}' aborted", self.name))
                })),
            },
        }
    }
}

/// Credentials for one ARN partition.
#[derive(Clone, Debug)]
pub struct S3Access {
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub region: String,
    pub use_ssl: bool,
}

/// The ARN shape resolved by [`create_fs_fn`]: the partition selects the
/// credentials, the namespace must be empty, and the subpath narrows the
/// backend with a sub-view.
pub const ARN_PATTERN: &str =
    r"^arn:(?P<partition>[^:]*):s3:(?P<region>[^:]*):(?P<namespace>[^:]*):(?P<subpath>[^:]*)";

/// A factory constructor resolving `arn:<partition>:s3:<region>::<subpath>`
/// to an S3 backend.
pub fn create_fs_fn(
    access: HashMap<String, S3Access>,
    debug: bool,
) -> impl Fn(crate::factory::Factory, String) -> crate::factory::ConstructorFuture {
    let arn = regex::Regex::new(ARN_PATTERN).expect("static regex");
    let access = Arc::new(access);
    move |_factory, path: String| -> crate::factory::ConstructorFuture {
        let arn = arn.clone();
        let access = access.clone();
        Box::pin(async move {
            let captures = arn
                .captures(&path)
                .ok_or_else(|| Error::InvalidPath(path.clone()))?;
            let partition = captures.name("partition").map_or("", |m| m.as_str());
            let account = access
                .get(partition)
                .ok_or_else(|| Error::new(format!("partition '{partition}' not supported")))?;
            let namespace = captures.name("namespace").map_or("", |m| m.as_str());
            if !namespace.is_empty() {
                return Err(Error::new(format!("namespace '{namespace}' not supported")));
            }
            let region = captures.name("region").map_or("", |m| m.as_str());
            let region = if region.is_empty() {
                account.region.clone()
            } else {
                region.to_owned()
            };
            let fs = S3Fs::connect(S3Options {
                endpoint: account.endpoint.clone(),
                access_key: account.access_key.clone(),
                secret_key: account.secret_key.clone(),
                region,
                use_ssl: account.use_ssl,
                debug,
                ca_pem: None,
            })
            .await?;
            match captures.name("subpath").map_or("", |m| m.as_str()) {
                "" => Ok(Arc::new(fs) as SharedFs),
                subpath => fs.sub(subpath),
            }
        })
    }
}

#[cfg(test)]
#[path = "./s3_test.rs"]
mod s3_test;
