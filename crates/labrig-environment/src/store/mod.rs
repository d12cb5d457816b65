// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable storage for environments and port leases.
//!
//! This module defines the storage abstraction and backend implementations.
//! Environments are never physically deleted; `DESTROYED` is terminal and
//! excluded from all active queries. Port leases are long-lived rows flipped
//! between `FREE` and `USED` rather than created and dropped.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgEnvironmentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;

/// Environment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvStatus {
    /// Container is up.
    Running,
    /// Container exists but is paused.
    Stopped,
    /// Terminal; external resources released.
    Destroyed,
}

impl EnvStatus {
    /// Status value as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvStatus::Running => "RUNNING",
            EnvStatus::Stopped => "STOPPED",
            EnvStatus::Destroyed => "DESTROYED",
        }
    }
}

impl std::fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port lease status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseStatus {
    /// Port is available for allocation.
    Free,
    /// Port is held by a non-destroyed environment.
    Used,
}

impl LeaseStatus {
    /// Status value as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Free => "FREE",
            LeaseStatus::Used => "USED",
        }
    }
}

/// Environment record from the store.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EnvironmentRecord {
    /// Unique identifier, generated by the orchestrator, immutable.
    pub env_id: String,
    /// Owning user id.
    pub owner: String,
    /// Normalized group; blank input is stored as `default`.
    pub env_group: String,
    /// Experiment id.
    pub experiment: String,
    /// Host port held exclusively while non-destroyed.
    pub port: i32,
    /// Engine-assigned id of the primary container, set on first start.
    pub container_ref: Option<String>,
    /// Directory holding the generated compose spec and logs.
    pub work_dir: String,
    /// Lifecycle status (`RUNNING`, `STOPPED`, `DESTROYED`).
    pub status: String,
    /// Address the environment is reachable at.
    pub url: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl EnvironmentRecord {
    /// Whether the record says the container is up.
    pub fn is_running(&self) -> bool {
        self.status == EnvStatus::Running.as_str()
    }

    /// Whether the record says the container is paused.
    pub fn is_stopped(&self) -> bool {
        self.status == EnvStatus::Stopped.as_str()
    }

    /// Whether the record reached its terminal status.
    pub fn is_destroyed(&self) -> bool {
        self.status == EnvStatus::Destroyed.as_str()
    }
}

/// Durable store for environments and port leases.
///
/// Implementations must enforce the dedup invariant at the query level: at
/// most one non-`DESTROYED` environment exists per (owner, group, experiment),
/// and active queries never return `DESTROYED` rows.
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Finds the non-destroyed environment for a dedup key, if any.
    async fn find_active(
        &self,
        owner: &str,
        group: &str,
        experiment: &str,
    ) -> Result<Option<EnvironmentRecord>, Error>;

    /// Fetches an environment by id regardless of status.
    async fn get(&self, env_id: &str) -> Result<Option<EnvironmentRecord>, Error>;

    /// Inserts a new environment record.
    async fn insert(&self, record: &EnvironmentRecord) -> Result<(), Error>;

    /// Rewrites a record in place; `updated_at` is bumped by the store.
    async fn update(&self, record: &EnvironmentRecord) -> Result<(), Error>;

    /// Non-destroyed environments belonging to one owner.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<EnvironmentRecord>, Error>;

    /// All non-destroyed environments.
    async fn list_all(&self) -> Result<Vec<EnvironmentRecord>, Error>;

    /// Lease status for a port; `None` when no lease row exists yet.
    async fn lease_status(&self, port: u16) -> Result<Option<LeaseStatus>, Error>;

    /// Conditionally claims a `FREE` lease for `holder`. Returns `false`
    /// when the lease was not free (lost race or already used).
    async fn claim_free_lease(&self, port: u16, holder: &str) -> Result<bool, Error>;

    /// Inserts a new lease row as `USED`. Returns `false` on a uniqueness
    /// conflict (another caller inserted the row first).
    async fn insert_lease_used(&self, port: u16, holder: &str) -> Result<bool, Error>;

    /// Returns a lease to the free pool and clears its holder. Releasing an
    /// already-free or unknown port is a no-op.
    async fn release_lease(&self, port: u16) -> Result<(), Error>;
}
