// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory environment store for testing.
//!
//! Implements the same claim semantics as the Postgres backend (conditional
//! claim on `FREE`, insert-or-conflict) so allocator and orchestrator tests
//! exercise the real race handling without a database.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{EnvironmentRecord, EnvironmentStore, LeaseStatus};
use crate::error::Error;

#[derive(Debug, Clone)]
struct Lease {
    status: LeaseStatus,
    holder: Option<String>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    envs: Mutex<HashMap<String, EnvironmentRecord>>,
    leases: Mutex<BTreeMap<u16, Lease>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-marks a port as used, for exhaustion scenarios.
    pub async fn seed_used_lease(&self, port: u16, holder: &str) {
        let mut leases = self.leases.lock().await;
        leases.insert(
            port,
            Lease {
                status: LeaseStatus::Used,
                holder: Some(holder.to_string()),
            },
        );
    }

    /// Holder recorded for a port, if any.
    pub async fn lease_holder(&self, port: u16) -> Option<String> {
        let leases = self.leases.lock().await;
        leases.get(&port).and_then(|l| l.holder.clone())
    }

    /// Number of leases currently marked used.
    pub async fn used_lease_count(&self) -> usize {
        let leases = self.leases.lock().await;
        leases
            .values()
            .filter(|l| l.status == LeaseStatus::Used)
            .count()
    }
}

#[async_trait]
impl EnvironmentStore for MemoryStore {
    async fn find_active(
        &self,
        owner: &str,
        group: &str,
        experiment: &str,
    ) -> Result<Option<EnvironmentRecord>, Error> {
        let envs = self.envs.lock().await;
        Ok(envs
            .values()
            .filter(|r| {
                r.owner == owner
                    && r.env_group == group
                    && r.experiment == experiment
                    && !r.is_destroyed()
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn get(&self, env_id: &str) -> Result<Option<EnvironmentRecord>, Error> {
        let envs = self.envs.lock().await;
        Ok(envs.get(env_id).cloned())
    }

    async fn insert(&self, record: &EnvironmentRecord) -> Result<(), Error> {
        let mut envs = self.envs.lock().await;
        envs.insert(record.env_id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &EnvironmentRecord) -> Result<(), Error> {
        let mut envs = self.envs.lock().await;
        let mut updated = record.clone();
        updated.updated_at = Utc::now();
        envs.insert(record.env_id.clone(), updated);
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<EnvironmentRecord>, Error> {
        let envs = self.envs.lock().await;
        let mut records: Vec<_> = envs
            .values()
            .filter(|r| r.owner == owner && !r.is_destroyed())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<EnvironmentRecord>, Error> {
        let envs = self.envs.lock().await;
        let mut records: Vec<_> = envs.values().filter(|r| !r.is_destroyed()).cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn lease_status(&self, port: u16) -> Result<Option<LeaseStatus>, Error> {
        let leases = self.leases.lock().await;
        Ok(leases.get(&port).map(|l| l.status))
    }

    async fn claim_free_lease(&self, port: u16, holder: &str) -> Result<bool, Error> {
        let mut leases = self.leases.lock().await;
        match leases.get_mut(&port) {
            Some(lease) if lease.status == LeaseStatus::Free => {
                lease.status = LeaseStatus::Used;
                lease.holder = Some(holder.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_lease_used(&self, port: u16, holder: &str) -> Result<bool, Error> {
        let mut leases = self.leases.lock().await;
        if leases.contains_key(&port) {
            return Ok(false);
        }
        leases.insert(
            port,
            Lease {
                status: LeaseStatus::Used,
                holder: Some(holder.to_string()),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, port: u16) -> Result<(), Error> {
        let mut leases = self.leases.lock().await;
        if let Some(lease) = leases.get_mut(&port) {
            lease.status = LeaseStatus::Free;
            lease.holder = None;
        }
        Ok(())
    }
}
