// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment lifecycle orchestration.
//!
//! Coordinates the port allocator, spec compiler, and container driver to
//! move environments through their lifecycle:
//!
//! ```text
//!                create_env
//!                    |
//!                    v
//!     +--------- RUNNING <--------+
//!     |              |            |
//!  stop_env      destroy_env   start_env / create_env
//!     |              |            |
//!     v              |            |
//!  STOPPED ----------+------------+
//!     |              |
//!  destroy_env       v
//!     +--------> DESTROYED (terminal)
//! ```
//!
//! Provisioning is a sequence of fallible steps with compensating cleanup:
//! when a later step fails, everything an earlier step acquired is released
//! again, and the original error reaches the caller unchanged. Teardown is
//! the mirror image, a best-effort sequence that never stops early, so
//! repeated destroys converge on a fully released environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use labrig_compose::{ExperimentManifest, MaterializeRequest, ProviderRegistry, SpecCompiler};

use crate::driver::ContainerDriver;
use crate::error::{Error, Result};
use crate::port::PortAllocator;
use crate::store::{EnvStatus, EnvironmentRecord, EnvironmentStore};

/// Group identity used when the caller does not name one.
const DEFAULT_GROUP: &str = "default";

/// How a project start should be supervised, resolved from the manifest.
struct StartPolicy {
    wait_for_healthy: bool,
    verify_exists: bool,
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self {
            wait_for_healthy: true,
            verify_exists: true,
        }
    }
}

/// A provisioning step failure plus the state needed to compensate for it.
struct ProvisionFailure {
    error: Error,
    /// Set once containers may have come up for this directory.
    partial_dir: Option<PathBuf>,
}

impl ProvisionFailure {
    fn clean(error: Error) -> Self {
        Self {
            error,
            partial_dir: None,
        }
    }

    fn partial(error: Error, dir: PathBuf) -> Self {
        Self {
            error,
            partial_dir: Some(dir),
        }
    }
}

/// Drives environment lifecycles end to end.
///
/// All state lives in the [`EnvironmentStore`]; the orchestrator itself only
/// holds collaborators and the per-key create locks, so it can be shared
/// freely behind an [`Arc`].
pub struct EnvironmentOrchestrator {
    store: Arc<dyn EnvironmentStore>,
    allocator: PortAllocator,
    driver: Arc<dyn ContainerDriver>,
    compiler: Arc<dyn SpecCompiler>,
    registry: Arc<ProviderRegistry>,
    server_host: String,
    // Entries are kept for the map's lifetime. Removing one while a waiter
    // still holds its Arc would let two creates for the same key interleave.
    create_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EnvironmentOrchestrator {
    /// Create an orchestrator from its collaborators.
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        allocator: PortAllocator,
        driver: Arc<dyn ContainerDriver>,
        compiler: Arc<dyn SpecCompiler>,
        registry: Arc<ProviderRegistry>,
        server_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            allocator,
            driver,
            compiler,
            registry,
            server_host: server_host.into(),
            create_locks: DashMap::new(),
        }
    }

    /// Create the environment for `(owner, group, experiment)`, or return the
    /// existing one.
    ///
    /// Idempotent per key: a RUNNING environment is returned unchanged, a
    /// STOPPED one is resumed in place, and only when resumption fails is the
    /// stale environment destroyed and a fresh one provisioned. Concurrent
    /// calls for the same key are serialized so they cannot double-provision.
    pub async fn create_env(
        &self,
        owner: &str,
        group: Option<&str>,
        experiment: &str,
    ) -> Result<EnvironmentRecord> {
        let group = normalize_group(group);
        let lock = self.create_lock(owner, &group, experiment);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.find_active(owner, &group, experiment).await? {
            if existing.is_running() {
                debug!(env_id = %existing.env_id, "environment already running");
                return Ok(existing);
            }

            match self
                .driver
                .start_existing(Path::new(&existing.work_dir))
                .await
            {
                Ok(container_ref) => {
                    let mut record = existing;
                    record.container_ref = Some(container_ref);
                    record.status = EnvStatus::Running.as_str().to_string();
                    self.store.update(&record).await?;
                    info!(env_id = %record.env_id, "stopped environment resumed");
                    return Ok(record);
                }
                Err(err) => {
                    // The containers are gone or refuse to come back. Destroy
                    // the stale environment and provision a fresh one.
                    warn!(env_id = %existing.env_id, error = %err, "stopped environment cannot be resumed, recreating");
                    self.destroy_env(&existing.env_id).await?;
                }
            }
        }

        self.create_fresh(owner, &group, experiment).await
    }

    /// Stop a running environment, preserving containers and volumes.
    pub async fn stop_env(&self, env_id: &str) -> Result<EnvironmentRecord> {
        let mut record = self.require_live(env_id).await?;
        if record.is_stopped() {
            debug!(env_id, "environment already stopped");
            return Ok(record);
        }

        self.driver.stop_only(Path::new(&record.work_dir)).await?;
        record.status = EnvStatus::Stopped.as_str().to_string();
        self.store.update(&record).await?;
        info!(env_id, "environment stopped");
        Ok(record)
    }

    /// Start a stopped environment without recreating anything.
    pub async fn start_env(&self, env_id: &str) -> Result<EnvironmentRecord> {
        let mut record = self.require_live(env_id).await?;
        if record.is_running() {
            debug!(env_id, "environment already running");
            return Ok(record);
        }

        match self.driver.start_existing(Path::new(&record.work_dir)).await {
            Ok(container_ref) => {
                record.container_ref = Some(container_ref);
                record.status = EnvStatus::Running.as_str().to_string();
                self.store.update(&record).await?;
                info!(env_id, "environment started");
                Ok(record)
            }
            Err(err) => {
                self.mark_stopped_after_failed_start(&mut record, &err).await;
                Err(err)
            }
        }
    }

    /// Tear the environment's containers down and bring them up again from
    /// the already-materialized spec directory.
    ///
    /// The recovery path for environments whose containers are wedged or
    /// were removed out-of-band. Volumes are preserved.
    pub async fn reset_env(&self, env_id: &str) -> Result<EnvironmentRecord> {
        let mut record = self.require_live(env_id).await?;
        let work_dir = PathBuf::from(&record.work_dir);
        info!(env_id, "resetting environment");

        self.driver.down(&work_dir, false).await;

        let policy = match self.compiler.load_manifest(&record.experiment).await {
            Ok(manifest) => self.start_policy(&manifest),
            Err(err) => {
                warn!(env_id, error = %err, "manifest unavailable during reset, using default start policy");
                StartPolicy::default()
            }
        };

        match self.driver.start(&work_dir, policy.wait_for_healthy).await {
            Ok(container_ref) => {
                if policy.verify_exists && !self.driver.exists(&container_ref).await {
                    let error = Error::ContainerStartFailed(format!(
                        "container {container_ref} disappeared right after reset"
                    ));
                    self.mark_stopped_after_failed_start(&mut record, &error).await;
                    return Err(error);
                }
                record.container_ref = Some(container_ref);
                record.status = EnvStatus::Running.as_str().to_string();
                self.store.update(&record).await?;
                info!(env_id, "environment reset");
                Ok(record)
            }
            Err(err) => {
                self.mark_stopped_after_failed_start(&mut record, &err).await;
                Err(err)
            }
        }
    }

    /// Destroy an environment and release everything it holds.
    ///
    /// Best-effort and convergent: each teardown step runs regardless of
    /// earlier failures, failures are logged rather than raised, and a
    /// repeat call on an already destroyed environment is a no-op. Only a
    /// failure to persist the final DESTROYED status reaches the caller.
    pub async fn destroy_env(&self, env_id: &str) -> Result<EnvironmentRecord> {
        let mut record = match self.store.get(env_id).await? {
            Some(record) if record.is_destroyed() => {
                debug!(env_id, "environment already destroyed");
                return Ok(record);
            }
            Some(record) => record,
            None => return Err(Error::EnvNotFound(env_id.to_string())),
        };

        info!(env_id, "destroying environment");
        let work_dir = PathBuf::from(&record.work_dir);

        self.driver.down(&work_dir, true).await;

        if let Err(err) = self.allocator.release(record.port as u16).await {
            warn!(env_id, port = record.port, error = %err, "could not release port during destroy");
        }

        if let Err(err) = self.compiler.remove_work_dir(&work_dir).await {
            warn!(env_id, dir = %work_dir.display(), error = %err, "could not remove environment directory");
        }

        if self.driver.exists_by_name(&record.env_id).await {
            warn!(env_id, "container survived teardown, force removing");
            self.driver.force_remove_by_name(&record.env_id).await;
        }

        record.status = EnvStatus::Destroyed.as_str().to_string();
        if let Err(err) = self.store.update(&record).await {
            error!(env_id, error = %err, "resources released but record could not be marked destroyed");
            return Err(err);
        }
        info!(env_id, "environment destroyed");
        Ok(record)
    }

    /// Report an environment's current status, reconciling drift.
    ///
    /// A record claiming RUNNING whose container no longer exists is flipped
    /// to STOPPED before it is returned. Containers removed out-of-band thus
    /// surface lazily, on the next status query.
    pub async fn env_status(&self, env_id: &str) -> Result<EnvironmentRecord> {
        let mut record = self
            .store
            .get(env_id)
            .await?
            .ok_or_else(|| Error::EnvNotFound(env_id.to_string()))?;

        if record.is_running() {
            let present = match record.container_ref.as_deref() {
                Some(container_ref) => self.driver.exists(container_ref).await,
                None => self.driver.exists_by_name(&record.env_id).await,
            };
            if !present {
                warn!(env_id, "container disappeared out-of-band, marking stopped");
                record.status = EnvStatus::Stopped.as_str().to_string();
                self.store.update(&record).await?;
            }
        }
        Ok(record)
    }

    /// All non-destroyed environments belonging to `owner`.
    pub async fn list_by_owner(&self, owner: &str) -> Result<Vec<EnvironmentRecord>> {
        self.store.list_by_owner(owner).await
    }

    /// All non-destroyed environments.
    pub async fn list_all(&self) -> Result<Vec<EnvironmentRecord>> {
        self.store.list_all().await
    }

    /// Provision a brand-new environment under an already-held create lock.
    async fn create_fresh(
        &self,
        owner: &str,
        group: &str,
        experiment: &str,
    ) -> Result<EnvironmentRecord> {
        // Fail before allocating anything when the engine is down; the error
        // is clearer than whatever a later compose call would report.
        if !self.driver.engine_available().await {
            return Err(Error::ContainerStartFailed(
                "container engine daemon is not running, start it and retry".to_string(),
            ));
        }

        let env_id = new_env_id();
        let port = self.allocator.allocate(&env_id).await?;
        info!(env_id, owner, group, experiment, port, "creating environment");

        match self.provision(owner, group, experiment, &env_id, port).await {
            Ok(record) => Ok(record),
            Err(failure) => {
                self.compensate(&env_id, port, failure.partial_dir.as_deref())
                    .await;
                Err(failure.error)
            }
        }
    }

    /// The fallible middle of a create: manifest, materialize, start, verify,
    /// persist. Failures report whether containers may already exist.
    async fn provision(
        &self,
        owner: &str,
        group: &str,
        experiment: &str,
        env_id: &str,
        port: u16,
    ) -> std::result::Result<EnvironmentRecord, ProvisionFailure> {
        let manifest = self
            .compiler
            .load_manifest(experiment)
            .await
            .map_err(|e| ProvisionFailure::clean(e.into()))?;
        let policy = self.start_policy(&manifest);

        let spec = self
            .compiler
            .materialize(MaterializeRequest {
                owner,
                group,
                experiment,
                env_id,
                port,
                manifest: &manifest,
            })
            .await
            .map_err(|e| ProvisionFailure::clean(e.into()))?;
        debug!(env_id, container = %spec.container_name, network = %spec.network_name, "environment spec materialized");

        let container_ref = self
            .driver
            .start(&spec.work_dir, policy.wait_for_healthy)
            .await
            .map_err(|e| ProvisionFailure::partial(e, spec.work_dir.clone()))?;

        if policy.verify_exists && !self.driver.exists(&container_ref).await {
            return Err(ProvisionFailure::partial(
                Error::ContainerStartFailed(format!(
                    "container {container_ref} disappeared right after start"
                )),
                spec.work_dir.clone(),
            ));
        }

        let now = Utc::now();
        let record = EnvironmentRecord {
            env_id: env_id.to_string(),
            owner: owner.to_string(),
            env_group: group.to_string(),
            experiment: experiment.to_string(),
            port: i32::from(port),
            container_ref: Some(container_ref),
            work_dir: spec.work_dir.display().to_string(),
            status: EnvStatus::Running.as_str().to_string(),
            url: format!("http://{}:{}", self.server_host, port),
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert(&record)
            .await
            .map_err(|e| ProvisionFailure::partial(e, spec.work_dir.clone()))?;

        info!(env_id, port, url = %record.url, "environment created");
        Ok(record)
    }

    /// Compensating cleanup for a failed create.
    ///
    /// Releases the port lease and stops whatever containers came up, with
    /// volumes preserved. The directory stays on disk for inspection; a later
    /// create generates a fresh id and directory, so nothing collides.
    async fn compensate(&self, env_id: &str, port: u16, partial_dir: Option<&Path>) {
        warn!(env_id, port, "environment create failed, rolling back");
        if let Err(err) = self.allocator.release(port).await {
            warn!(env_id, port, error = %err, "could not release port during rollback");
        }
        if let Some(dir) = partial_dir {
            self.driver.down(dir, false).await;
        }
    }

    /// Resolve how a start should be supervised for this manifest.
    ///
    /// A start is only awaited on health when some health probe exists, and
    /// the database provider may veto both the health wait and the
    /// post-start existence check (interactive workspaces do).
    fn start_policy(&self, manifest: &ExperimentManifest) -> StartPolicy {
        let strategy = self.registry.runtime(manifest.effective_runtime());
        let settings = manifest.effective_database();
        let provider = settings.as_ref().map(|s| self.registry.database(s));

        let container_port = manifest
            .effective_container_port()
            .unwrap_or_else(|| strategy.default_container_port());
        let has_probe = manifest.health_check.is_some()
            || strategy.default_health_check(container_port).is_some();

        StartPolicy {
            wait_for_healthy: has_probe
                && provider.as_ref().is_none_or(|p| p.wait_for_app_health()),
            verify_exists: provider.as_ref().is_none_or(|p| p.verify_container_exists()),
        }
    }

    /// Record a failed start: the environment stays STOPPED.
    async fn mark_stopped_after_failed_start(
        &self,
        record: &mut EnvironmentRecord,
        error: &Error,
    ) {
        warn!(env_id = %record.env_id, error = %error, "start failed, environment stays stopped");
        record.status = EnvStatus::Stopped.as_str().to_string();
        if let Err(err) = self.store.update(record).await {
            warn!(env_id = %record.env_id, error = %err, "could not persist stopped status");
        }
    }

    /// Fetch a record that still has live resources. DESTROYED records are
    /// terminal and reported as not found.
    async fn require_live(&self, env_id: &str) -> Result<EnvironmentRecord> {
        match self.store.get(env_id).await? {
            Some(record) if !record.is_destroyed() => Ok(record),
            _ => Err(Error::EnvNotFound(env_id.to_string())),
        }
    }

    fn create_lock(&self, owner: &str, group: &str, experiment: &str) -> Arc<Mutex<()>> {
        let key = format!("{owner}/{group}/{experiment}");
        self.create_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Normalize the caller-supplied group, blank and missing both mean default.
fn normalize_group(group: Option<&str>) -> String {
    match group.map(str::trim) {
        Some(group) if !group.is_empty() => group.to_string(),
        _ => DEFAULT_GROUP.to_string(),
    }
}

/// Generate an environment id, also used as the container name.
fn new_env_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("env-{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_missing_and_blank_groups() {
        assert_eq!(normalize_group(None), "default");
        assert_eq!(normalize_group(Some("")), "default");
        assert_eq!(normalize_group(Some("   ")), "default");
        assert_eq!(normalize_group(Some(" sys-1 ")), "sys-1");
    }

    #[test]
    fn env_ids_are_prefixed_and_unique() {
        let first = new_env_id();
        let second = new_env_id();

        assert!(first.starts_with("env-"));
        assert_eq!(first.len(), "env-".len() + 12);
        assert!(first[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
