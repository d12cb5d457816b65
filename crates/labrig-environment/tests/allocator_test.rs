// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concurrency tests for the port allocator.
//!
//! Sequential allocation is covered in the module's unit tests; these spawn
//! real tasks against one shared allocator to exercise the claim race on the
//! lease table.

mod common;

use std::sync::Arc;

use futures::future::join_all;

use labrig_environment::error::Error;
use labrig_environment::port::PortAllocator;
use labrig_environment::store::MemoryStore;

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_allocations_get_distinct_ports() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let allocator = Arc::new(PortAllocator::new(store.clone(), 45130, 45149));

    let tasks = (0..8).map(|i| {
        let allocator = allocator.clone();
        tokio::spawn(async move { allocator.allocate(&format!("env-{i}")).await })
    });
    let results = join_all(tasks).await;

    let mut ports: Vec<u16> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 8, "every claimant must win a distinct port");
    assert_eq!(store.used_lease_count().await, 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_claims_on_exhausted_range_admit_range_size() {
    let store = Arc::new(MemoryStore::new());
    let allocator = Arc::new(PortAllocator::new(store.clone(), 45160, 45162));

    let tasks = (0..6).map(|i| {
        let allocator = allocator.clone();
        tokio::spawn(async move { allocator.allocate(&format!("env-{i}")).await })
    });
    let results = join_all(tasks).await;

    let mut won = Vec::new();
    let mut lost = 0;
    for result in results {
        match result.unwrap() {
            Ok(port) => won.push(port),
            Err(Error::NoAvailablePort { min, max }) => {
                assert_eq!((min, max), (45160, 45162));
                lost += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    won.sort_unstable();
    won.dedup();
    assert_eq!(won.len(), 3, "exactly one claimant per port");
    assert_eq!(lost, 3);
    assert_eq!(store.used_lease_count().await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_release_under_contention_frees_exactly_one_slot() {
    let store = Arc::new(MemoryStore::new());
    let allocator = Arc::new(PortAllocator::new(store.clone(), 45170, 45171));

    let a = allocator.allocate("env-a").await.unwrap();
    let b = allocator.allocate("env-b").await.unwrap();
    assert_ne!(a, b);

    allocator.release(a).await.unwrap();

    // Two waiters race for the single freed port.
    let tasks = (0..2).map(|i| {
        let allocator = allocator.clone();
        tokio::spawn(async move { allocator.allocate(&format!("env-late-{i}")).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::NoAvailablePort { .. }))));

    let holder = store.lease_holder(a).await.expect("freed port re-claimed");
    assert!(holder.starts_with("env-late-"));
}
