// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use super::*;

#[tokio::test]
async fn test_observed_state_follows_guard() {
    let mutex = ObservableMutex::new();
    assert!(!mutex.is_locked());

    let guard = mutex.acquire().await;
    assert!(mutex.is_locked());

    drop(guard);
    assert!(!mutex.is_locked());
}

#[tokio::test]
async fn test_guard_serializes_acquisition() {
    let mutex = ObservableMutex::new();
    let guard = mutex.acquire().await;

    let contender = {
        let mutex = mutex.clone();
        tokio::spawn(async move {
            let _guard = mutex.acquire().await;
        })
    };
    // the contender cannot finish while the guard is held
    tokio::task::yield_now().await;
    assert!(!contender.is_finished());

    drop(guard);
    contender.await.unwrap();
    assert!(!mutex.is_locked());
}
