// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, RwLock};

use crate::fs::{FileRead, FileSystem, FileWrite, SharedFs};
use crate::info::{DirEntry, FileInfo};
use crate::storage::sub::SubFs;
use crate::storage::zip::ZipFs;
use crate::{path, Error, ErrorList, Result};

const REAPER_TICK: Duration = Duration::from_secs(60);

/// Mounts archive files as read-only folders inside a base filesystem.
///
/// Any path component with a `.zip` extension (innermost wins) switches
/// resolution into an archive held open in a bounded LRU. A background
/// reaper closes idle archives once a minute; archives with an open entry
/// stream are never evicted.
#[derive(Clone)]
pub struct ZipFolderFs {
    inner: Arc<Inner>,
}

struct Inner {
    base: SharedFs,
    capacity: usize,
    cache: StdMutex<Lru>,
    // readers hold this shared; the reaper and close hold it exclusively
    gate: RwLock<()>,
    stop: StdMutex<Option<oneshot::Sender<()>>>,
}

#[derive(Default)]
struct Lru {
    map: HashMap<String, ZipFs>,
    order: VecDeque<String>,
}

impl Lru {
    fn get(&mut self, key: &str) -> Option<ZipFs> {
        let archive = self.map.get(key)?.clone();
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(pos).expect("position just found");
            self.order.push_back(key);
        }
        Some(archive)
    }

    fn insert(&mut self, key: String, archive: ZipFs) {
        if self.map.insert(key.clone(), archive).is_none() {
            self.order.push_back(key);
        }
    }

    fn remove(&mut self, key: &str) -> Option<ZipFs> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.map.remove(key)
    }

    /// Evict least-recently-used unlocked entries (never `protect`) until
    /// the cache fits `capacity`. Returns the evicted archives and whether
    /// the cache is still over capacity.
    fn evict_excess(&mut self, capacity: usize, protect: &str) -> (Vec<ZipFs>, bool) {
        let mut evicted = Vec::new();
        while self.map.len() > capacity {
            let candidate = self
                .order
                .iter()
                .find(|key| key.as_str() != protect && !self.map[key.as_str()].is_locked())
                .cloned();
            match candidate {
                Some(key) => {
                    evicted.push(self.remove(&key).expect("candidate present"));
                }
                None => return (evicted, true),
            }
        }
        (evicted, false)
    }

    fn take_unlocked(&mut self) -> Vec<ZipFs> {
        let keys: Vec<String> = self
            .order
            .iter()
            .filter(|key| !self.map[key.as_str()].is_locked())
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|key| self.remove(key))
            .collect()
    }

    fn drain(&mut self) -> Vec<ZipFs> {
        self.order.clear();
        self.map.drain().map(|(_, archive)| archive).collect()
    }
}

impl ZipFolderFs {
    pub fn new(base: SharedFs, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Invalid(
                "zip-as-folder cache capacity must be nonzero".to_owned(),
            ));
        }
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let inner = Arc::new(Inner {
            base,
            capacity,
            cache: StdMutex::new(Lru::default()),
            gate: RwLock::new(()),
            stop: StdMutex::new(Some(stop_tx)),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_TICK);
            interval.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = interval.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { return };
                if let Err(err) = reap(&inner).await {
                    tracing::warn!(?err, "failed to clear idle archives");
                }
            }
        });

        Ok(Self { inner })
    }

    /// Fetch the archive at `zip_path` from the cache, loading it through
    /// the base filesystem on a miss. Caller must hold the read gate.
    async fn archive(&self, zip_path: &str) -> Result<ZipFs> {
        if let Some(archive) = self.inner.cache.lock().expect("cache poisoned").get(zip_path) {
            return Ok(archive);
        }

        let loaded = ZipFs::open_from(self.inner.base.as_ref(), zip_path).await?;

        let (archive, evicted, refused) = {
            let mut cache = self.inner.cache.lock().expect("cache poisoned");
            if let Some(existing) = cache.get(zip_path) {
                // lost a load race; keep the resident archive
                (existing, vec![loaded.clone()], false)
            } else {
                cache.insert(zip_path.to_owned(), loaded.clone());
                let (evicted, still_over) = cache.evict_excess(self.inner.capacity, zip_path);
                if still_over {
                    cache.remove(zip_path);
                    (loaded.clone(), vec![loaded.clone()], true)
                } else {
                    (loaded, evicted, false)
                }
            }
        };
        for archive in evicted {
            if let Err(err) = archive.close_archive().await {
                tracing::warn!(?err, "failed to close evicted archive");
            }
        }
        if refused {
            return Err(Error::ArchiveCacheFull(zip_path.to_owned()));
        }
        Ok(archive)
    }

    /// Drop every archive with no in-flight open file. Runs under the
    /// exclusive gate so no reader can be mid-operation.
    pub async fn clear_unlocked(&self) -> Result<()> {
        reap(&self.inner).await
    }

    #[cfg(test)]
    pub(crate) fn cached_count(&self) -> usize {
        self.inner.cache.lock().expect("cache poisoned").map.len()
    }

    fn refuse_inside_archive(&self, name: &str, op: &str) -> Result<String> {
        match path::split_zip_path(name)? {
            Some((zip_path, inner)) if !inner.is_empty() => Err(Error::Invalid(format!(
                "cannot {op} '{inner}' inside archive '{zip_path}'"
            ))),
            _ => path::clean(name),
        }
    }
}

async fn reap(inner: &Arc<Inner>) -> Result<()> {
    let _gate = inner.gate.write().await;
    let idle = inner.cache.lock().expect("cache poisoned").take_unlocked();
    let mut errs = ErrorList::new();
    for archive in idle {
        errs.record(archive.close_archive().await);
    }
    errs.finish()
}

impl fmt::Display for ZipFolderFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zipfolder({}, {})", self.inner.base, self.inner.capacity)
    }
}

#[async_trait]
impl FileSystem for ZipFolderFs {
    async fn open(&self, name: &str) -> Result<Box<dyn FileRead>> {
        match path::split_zip_path(name)? {
            None => self.inner.base.open(name).await,
            Some((zip_path, inner_path)) => {
                let _gate = self.inner.gate.read().await;
                let archive = self.archive(&zip_path).await?;
                archive.open(&inner_path).await.map_err(|err| {
                    Error::new(format!(
                        "cannot open '{inner_path}' in archive '{zip_path}': {err}"
                    ))
                })
            }
        }
    }

    async fn stat(&self, name: &str) -> Result<FileInfo> {
        match path::split_zip_path(name)? {
            None => self.inner.base.stat(name).await,
            Some((zip_path, inner_path)) => {
                let _gate = self.inner.gate.read().await;
                let archive = self.archive(&zip_path).await?;
                archive.stat(&inner_path).await
            }
        }
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        match path::split_zip_path(name)? {
            None => {
                let entries = self.inner.base.read_dir(name).await?;
                // archives appear as folders in listings
                Ok(entries
                    .into_iter()
                    .map(|entry| {
                        if !entry.is_dir() && path::is_zip_name(entry.name()) {
                            DirEntry::new_dir(entry.name())
                        } else {
                            entry
                        }
                    })
                    .collect())
            }
            Some((zip_path, inner_path)) => {
                let _gate = self.inner.gate.read().await;
                let archive = self.archive(&zip_path).await?;
                archive.read_dir(&inner_path).await
            }
        }
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        match path::split_zip_path(name)? {
            None => self.inner.base.read_file(name).await,
            Some((zip_path, inner_path)) => {
                let _gate = self.inner.gate.read().await;
                let archive = self.archive(&zip_path).await?;
                archive.read_file(&inner_path).await
            }
        }
    }

    async fn create(&self, name: &str) -> Result<Box<dyn FileWrite>> {
        let name = self.refuse_inside_archive(name, "create")?;
        self.inner.base.create(&name).await
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let name = self.refuse_inside_archive(name, "mkdir")?;
        self.inner.base.mkdir(&name).await
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_name = self.refuse_inside_archive(old_name, "rename")?;
        let new_name = self.refuse_inside_archive(new_name, "rename")?;
        self.inner.base.rename(&old_name, &new_name).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let name = self.refuse_inside_archive(name, "remove")?;
        self.inner.base.remove(&name).await
    }

    fn full_path(&self, name: &str) -> Result<String> {
        self.inner.base.full_path(name)
    }

    fn sub(&self, dir: &str) -> Result<SharedFs> {
        SubFs::new(Arc::new(self.clone()), dir).map(|sub| Arc::new(sub) as SharedFs)
    }

    /// Stop the reaper, purge the cache, and close the base filesystem.
    async fn close(&self) -> Result<()> {
        if let Some(stop) = self.inner.stop.lock().expect("stop poisoned").take() {
            let _ = stop.send(());
        }
        let _gate = self.inner.gate.write().await;
        let archives = self.inner.cache.lock().expect("cache poisoned").drain();
        let mut errs = ErrorList::new();
        for archive in archives {
            errs.record(archive.close_archive().await);
        }
        errs.record(self.inner.base.close().await);
        errs.finish()
    }

    fn is_locked(&self) -> bool {
        let cache = self.inner.cache.lock().expect("cache poisoned");
        cache.map.values().any(|archive| archive.is_locked())
    }
}

#[cfg(test)]
#[path = "./zipfolder_test.rs"]
mod zipfolder_test;
