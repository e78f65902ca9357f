// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::*;

#[tokio::test]
async fn test_lend_and_return() {
    let pool = Pool::new(vec![1u32, 2]);
    let a = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let b = pool.acquire(Duration::from_secs(1)).await.unwrap();
    assert_ne!(*a, *b);
    drop(a);
    let c = pool.acquire(Duration::from_secs(1)).await.unwrap();
    drop(b);
    drop(c);
}

#[tokio::test]
async fn test_exhausted_pool_times_out() {
    let pool = Pool::new(vec![(), ()]);
    let _a = pool.acquire(Duration::from_secs(1)).await.unwrap();
    let _b = pool.acquire(Duration::from_secs(1)).await.unwrap();

    let started = Instant::now();
    let err = pool.acquire(Duration::from_millis(250)).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_release_unblocks_exactly_one_waiter() {
    let pool = Arc::new(Pool::new(vec![()]));
    let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let guard = pool.acquire(Duration::from_secs(5)).await.unwrap();
            (started.elapsed(), guard)
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    drop(guard);

    let (waited, guard) = waiter.await.unwrap();
    assert!(waited >= Duration::from_millis(100), "waiter must block until release");
    drop(guard);
}

#[tokio::test]
async fn test_close_drains_and_rejects() {
    let pool = Pool::new(vec![1u32, 2, 3]);
    let lent = pool.acquire(Duration::from_secs(1)).await.unwrap();

    let drained = pool.close().await;
    assert_eq!(drained.len(), 2, "idle items are handed back for teardown");

    assert!(pool.acquire(Duration::from_millis(100)).await.is_err());
    // a guard returning after close simply drops its item
    drop(lent);
    assert!(pool.acquire(Duration::from_millis(100)).await.is_err());
}
