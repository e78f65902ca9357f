// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::{Error, Result};

/// A bounded lending pool of reusable items (SFTP sessions).
///
/// Items are lent out by [`acquire`](Self::acquire) and return to the pool
/// when the guard drops, so the number of items in flight plus the number
/// idle is constant. Acquisition past the pool size blocks until a guard
/// returns or the timeout elapses.
pub struct Pool<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).ok().expect("fresh channel has room");
        }
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Borrow an item, waiting up to `timeout` for one to come back.
    pub async fn acquire(&self, timeout: Duration) -> Result<PoolGuard<T>> {
        let item = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .map_err(|_| Error::Timeout("session acquisition".to_owned()))?;
        match item {
            Some(item) => Ok(PoolGuard {
                item: Some(item),
                tx: self.tx.clone(),
            }),
            None => Err(Error::Invalid("pool is closed".to_owned())),
        }
    }

    /// Shut the pool: pending and future acquisitions fail, and the idle
    /// items are handed back for teardown. Items still lent out are
    /// dropped when their guards release.
    pub async fn close(&self) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }
}

#[derive(Debug)]
pub struct PoolGuard<T> {
    item: Option<T>,
    tx: mpsc::Sender<T>,
}

impl<T> Deref for PoolGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("present until drop")
    }
}

impl<T> DerefMut for PoolGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("present until drop")
    }
}

impl<T> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            // fails only when the pool is closed; the item is torn down
            let _ = self.tx.try_send(item);
        }
    }
}

#[cfg(test)]
#[path = "./pool_test.rs"]
mod pool_test;
