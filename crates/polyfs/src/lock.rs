// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A mutex whose held/free state can be observed from outside.
///
/// The observation is advisory: it is updated at lock and unlock boundaries
/// and races with the mutex itself. The ZIP-as-folder reaper uses it to skip
/// archives with in-flight readers; nothing correctness-sensitive may.
#[derive(Clone, Debug)]
pub struct ObservableMutex {
    inner: Arc<Mutex<()>>,
    locked: Arc<AtomicBool>,
}

impl ObservableMutex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            locked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquire the mutex. The returned guard is owned and may be held for
    /// the lifetime of an open file; dropping it releases the mutex.
    pub async fn acquire(&self) -> LockGuard {
        let guard = self.inner.clone().lock_owned().await;
        self.locked.store(true, Ordering::SeqCst);
        LockGuard {
            locked: self.locked.clone(),
            _guard: guard,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl Default for ObservableMutex {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LockGuard {
    locked: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "./lock_test.rs"]
mod lock_test;
