// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Port allocation from a fixed range.
//!
//! Allocation scans the range ascending and claims the first port that is
//! neither leased `USED` nor bound by the host OS. The lease table covers
//! concurrent callers (conditional claim on `FREE`); the bind probe covers
//! stale bookkeeping, since the table can disagree with the outside world.
//! Linear scan keeps allocation deterministic with low ports preferred.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{EnvironmentStore, LeaseStatus};

/// Allocates and releases host ports backed by the lease table.
pub struct PortAllocator {
    store: Arc<dyn EnvironmentStore>,
    min: u16,
    max: u16,
}

impl PortAllocator {
    /// An allocator over the inclusive range `[min, max]`.
    pub fn new(store: Arc<dyn EnvironmentStore>, min: u16, max: u16) -> Self {
        Self { store, min, max }
    }

    /// Claims the first available port for `holder`.
    ///
    /// Fails with [`Error::NoAvailablePort`] when the range is exhausted
    /// without a successful claim.
    pub async fn allocate(&self, holder: &str) -> Result<u16> {
        for port in self.min..=self.max {
            let status = self.store.lease_status(port).await?;
            if status == Some(LeaseStatus::Used) {
                continue;
            }
            if !os_port_free(port) {
                debug!(port, "port bound on host, skipping");
                continue;
            }
            let claimed = match status {
                Some(_) => self.store.claim_free_lease(port, holder).await?,
                None => self.store.insert_lease_used(port, holder).await?,
            };
            if claimed {
                info!(port, holder, "allocated port");
                return Ok(port);
            }
            // Lost the claim race; keep scanning.
        }
        Err(Error::NoAvailablePort {
            min: self.min,
            max: self.max,
        })
    }

    /// Returns a port to the free pool. Idempotent; releasing an unknown or
    /// already-free port is a no-op.
    pub async fn release(&self, port: u16) -> Result<()> {
        self.store.release_lease(port).await.map_err(|err| {
            warn!(port, error = %err, "failed to release port lease");
            Error::PortReleaseFailed(port)
        })
    }
}

/// Bind-and-close probe against the host OS.
fn os_port_free(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn allocates_lowest_free_port() {
        let store = Arc::new(MemoryStore::new());
        store.seed_used_lease(42700, "env-a").await;
        store.seed_used_lease(42701, "env-b").await;
        let allocator = PortAllocator::new(store.clone(), 42700, 42702);

        let port = allocator.allocate("env-x").await.unwrap();
        assert_eq!(port, 42702);
        assert_eq!(store.lease_holder(42702).await.as_deref(), Some("env-x"));
    }

    #[tokio::test]
    async fn exhausted_range_fails_with_no_available_port() {
        let store = Arc::new(MemoryStore::new());
        store.seed_used_lease(42710, "env-a").await;
        store.seed_used_lease(42711, "env-b").await;
        store.seed_used_lease(42712, "env-c").await;
        let allocator = PortAllocator::new(store, 42710, 42712);

        let err = allocator.allocate("env-y").await.unwrap_err();
        assert!(matches!(
            err,
            Error::NoAvailablePort {
                min: 42710,
                max: 42712
            }
        ));
    }

    #[tokio::test]
    async fn released_port_can_be_reallocated() {
        let store = Arc::new(MemoryStore::new());
        let allocator = PortAllocator::new(store.clone(), 42720, 42720);

        let port = allocator.allocate("env-a").await.unwrap();
        assert_eq!(port, 42720);
        allocator.release(port).await.unwrap();
        assert!(store.lease_holder(42720).await.is_none());

        let port = allocator.allocate("env-b").await.unwrap();
        assert_eq!(port, 42720);
        assert_eq!(store.lease_holder(42720).await.as_deref(), Some("env-b"));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let allocator = PortAllocator::new(store, 42730, 42731);

        allocator.release(42730).await.unwrap();
        allocator.release(42730).await.unwrap();
    }

    #[tokio::test]
    async fn skips_ports_bound_on_the_host() {
        // Hold a port at the OS level so only the lease table thinks it is free.
        let listener = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let bound = listener.local_addr().unwrap().port();

        let store = Arc::new(MemoryStore::new());
        let allocator = PortAllocator::new(store, bound, bound);

        let err = allocator.allocate("env-z").await.unwrap_err();
        assert!(matches!(err, Error::NoAvailablePort { .. }));
        drop(listener);
    }
}
