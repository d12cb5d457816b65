// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trait for container engine backends.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Abstraction over the container engine control plane.
///
/// One driver instance serves every environment; each call is scoped to a
/// single materialized spec directory or a single container reference. The
/// production implementation shells out to `docker compose`; tests use
/// [`crate::driver::MockDriver`].
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Whether the engine daemon is reachable at all.
    ///
    /// Used as a fast-fail precondition before provisioning work begins, so
    /// callers get a clear "daemon is down" error instead of a cryptic
    /// failure halfway through.
    async fn engine_available(&self) -> bool;

    /// Brings up the project materialized in `dir` and returns the engine
    /// reference of its primary container.
    ///
    /// When `wait_for_healthy` is set, blocks until the container reports
    /// healthy or a soft timeout elapses. The timeout is logged, not fatal;
    /// slow-starting workloads are still considered started.
    async fn start(&self, dir: &Path, wait_for_healthy: bool) -> Result<String>;

    /// Restarts the stopped containers of an existing project in `dir` and
    /// returns the primary container reference.
    ///
    /// Verifies the container actually came back up; fails with
    /// [`crate::Error::ContainerNotFound`] when it was removed out-of-band
    /// and a full recreate is required.
    async fn start_existing(&self, dir: &Path) -> Result<String>;

    /// Tears down the project in `dir`, optionally removing named volumes.
    ///
    /// Best-effort: failures are logged and swallowed so teardown sequences
    /// can keep going.
    async fn down(&self, dir: &Path, remove_volumes: bool);

    /// Stops the project's containers without removing them, preserving all
    /// container and volume state for a later restart.
    async fn stop_only(&self, dir: &Path) -> Result<()>;

    /// Whether a container with this engine reference exists, running or not.
    async fn exists(&self, container_ref: &str) -> bool;

    /// Whether a container with exactly this name exists, running or not.
    async fn exists_by_name(&self, name: &str) -> bool;

    /// Whether a container with exactly this name is currently running.
    async fn running_by_name(&self, name: &str) -> bool;

    /// Force-removes a container by name. Best-effort, used as a last resort
    /// when a project teardown left a container behind.
    async fn force_remove_by_name(&self, name: &str);
}
