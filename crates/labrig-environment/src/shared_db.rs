// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle manager for the shared MySQL container.
//!
//! Environments in shared database mode all talk to one long-lived MySQL
//! container on a dedicated external network, with one schema per
//! environment. This module keeps that container alive: it creates it on
//! first use (when auto-create is enabled), restarts it when it is stopped,
//! replaces it when mysqld stops answering, and provisions per-environment
//! schemas on demand. [`SharedDbManager::stop`] and
//! [`SharedDbManager::destroy`] cover out-of-band administration.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use labrig_compose::{ProviderError, SharedDatabase};

use crate::error::Error;

/// Name of the shared MySQL container.
pub const SHARED_CONTAINER: &str = "shared-mysql";

/// External network the shared container and its clients join.
pub const SHARED_NETWORK: &str = "shared-mysql-net";

/// Named volume holding the shared MySQL data directory.
pub const SHARED_VOLUME: &str = "shared-mysql-data";

const MYSQL_IMAGE: &str = "mysql:8.0";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// How long a freshly started container gets to come up.
const READY_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period for a container that is already reported as running.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages the shared MySQL container through the `docker` CLI.
pub struct SharedDbManager {
    root_password: String,
    auto_create: bool,
}

impl SharedDbManager {
    /// Create a manager.
    ///
    /// When `auto_create` is false the manager never creates the container,
    /// only verifies and restarts an existing one.
    pub fn new(root_password: impl Into<String>, auto_create: bool) -> Self {
        Self {
            root_password: root_password.into(),
            auto_create,
        }
    }

    /// Engine state of the shared container, `None` when it does not exist.
    async fn container_state(&self) -> Option<String> {
        let output = Command::new("docker")
            .args([
                "ps",
                "-a",
                "--filter",
                &format!("name={SHARED_CONTAINER}"),
                "--format",
                "{{.Names}}\t{{.State}}",
            ])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .find(|(name, _)| *name == SHARED_CONTAINER)
            .map(|(_, state)| state.trim().to_string())
    }

    /// Make sure the shared network exists, creating it when needed.
    async fn ensure_network(&self) -> Result<(), ProviderError> {
        let inspect = Command::new("docker")
            .args(["network", "inspect", SHARED_NETWORK])
            .output()
            .await
            .map_err(|e| ProviderError::SharedUnavailable(e.to_string()))?;
        if inspect.status.success() {
            return Ok(());
        }

        let create = Command::new("docker")
            .args(["network", "create", SHARED_NETWORK])
            .output()
            .await
            .map_err(|e| ProviderError::SharedUnavailable(e.to_string()))?;
        let stderr = String::from_utf8_lossy(&create.stderr);
        if create.status.success() || stderr.contains("already exists") {
            debug!(network = SHARED_NETWORK, "shared database network ready");
            Ok(())
        } else {
            Err(ProviderError::SharedUnavailable(format!(
                "could not create network {SHARED_NETWORK}: {}",
                tail(&stderr)
            )))
        }
    }

    /// Create the shared container from scratch.
    async fn create_container(&self) -> Result<(), ProviderError> {
        info!(container = SHARED_CONTAINER, "creating shared MySQL container");
        let output = Command::new("docker")
            .args([
                "run",
                "-d",
                "--name",
                SHARED_CONTAINER,
                "--restart",
                "unless-stopped",
                "--network",
                SHARED_NETWORK,
                "-e",
                &format!("MYSQL_ROOT_PASSWORD={}", self.root_password),
                "-v",
                &format!("{SHARED_VOLUME}:/var/lib/mysql"),
                MYSQL_IMAGE,
                "--character-set-server=utf8mb4",
                "--collation-server=utf8mb4_unicode_ci",
            ])
            .output()
            .await
            .map_err(|e| ProviderError::SharedUnavailable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProviderError::SharedUnavailable(format!(
                "could not create {SHARED_CONTAINER}: {}",
                tail(&stderr)
            )))
        }
    }

    /// Restart a stopped shared container.
    async fn start_container(&self) -> Result<(), ProviderError> {
        info!(container = SHARED_CONTAINER, "restarting shared MySQL container");
        let output = Command::new("docker")
            .args(["start", SHARED_CONTAINER])
            .output()
            .await
            .map_err(|e| ProviderError::SharedUnavailable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProviderError::SharedUnavailable(format!(
                "could not start {SHARED_CONTAINER}: {}",
                tail(&stderr)
            )))
        }
    }

    /// Block until mysqld answers pings, bounded by `timeout`.
    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ProviderError> {
        let deadline = Instant::now() + timeout;
        loop {
            let ping = Command::new("docker")
                .args([
                    "exec",
                    "-e",
                    &format!("MYSQL_PWD={}", self.root_password),
                    SHARED_CONTAINER,
                    "mysqladmin",
                    "ping",
                    "-uroot",
                    "--silent",
                ])
                .output()
                .await;

            if matches!(ping, Ok(ref output) if output.status.success()) {
                debug!(container = SHARED_CONTAINER, "shared MySQL is answering");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::SharedUnavailable(format!(
                    "{SHARED_CONTAINER} did not become ready within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Force-remove the shared container, keeping the named data volume.
    async fn remove_container(&self) {
        match Command::new("docker")
            .args(["rm", "-f", "-v", SHARED_CONTAINER])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!(container = SHARED_CONTAINER, "removed shared MySQL container");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(
                    container = SHARED_CONTAINER,
                    stderr = tail(&stderr),
                    "shared MySQL container was not removed"
                );
            }
            Err(err) => {
                warn!(container = SHARED_CONTAINER, error = %err, "could not invoke docker rm");
            }
        }
    }

    /// Replace a wedged container with a fresh one.
    ///
    /// The data volume is reattached, so existing schemas survive.
    async fn recreate(&self) -> Result<(), ProviderError> {
        self.remove_container().await;
        self.ensure_network().await?;
        self.create_container().await?;
        self.wait_until_ready(READY_TIMEOUT).await
    }

    /// Stop the shared container without removing it.
    ///
    /// A missing or already-stopped container is a no-op.
    pub async fn stop(&self) -> Result<(), Error> {
        match self.container_state().await.as_deref() {
            None => {
                debug!(container = SHARED_CONTAINER, "shared MySQL does not exist, nothing to stop");
                return Ok(());
            }
            Some(state) if state != "running" => {
                debug!(container = SHARED_CONTAINER, state, "shared MySQL is already stopped");
                return Ok(());
            }
            Some(_) => {}
        }

        info!(container = SHARED_CONTAINER, "stopping shared MySQL container");
        let output = Command::new("docker")
            .args(["stop", SHARED_CONTAINER])
            .output()
            .await
            .map_err(|e| Error::ContainerStopFailed(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::ContainerStopFailed(tail(&stderr).to_string()))
        }
    }

    /// Remove the shared container and its data volume.
    ///
    /// Best-effort: failures are logged, not returned. The shared network is
    /// left in place because stopped environments still reference it.
    pub async fn destroy(&self) {
        warn!(container = SHARED_CONTAINER, "destroying shared MySQL container and its data");
        self.remove_container().await;

        match Command::new("docker")
            .args(["volume", "rm", SHARED_VOLUME])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                info!(volume = SHARED_VOLUME, "removed shared MySQL data volume");
            }
            Ok(_) => {
                debug!(volume = SHARED_VOLUME, "data volume not removed, it may not exist");
            }
            Err(err) => {
                warn!(volume = SHARED_VOLUME, error = %err, "could not invoke docker volume rm");
            }
        }
    }
}

#[async_trait]
impl SharedDatabase for SharedDbManager {
    async fn ensure_available(&self) -> Result<(), ProviderError> {
        match self.container_state().await.as_deref() {
            Some("running") => match self.wait_until_ready(PROBE_TIMEOUT).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(
                        container = SHARED_CONTAINER,
                        error = %err,
                        "shared MySQL is up but not answering, recreating"
                    );
                    self.recreate().await
                }
            },
            Some(state) => {
                warn!(container = SHARED_CONTAINER, state, "shared MySQL is not running");
                match self.start_container().await {
                    Ok(()) => self.wait_until_ready(READY_TIMEOUT).await,
                    Err(err) => {
                        warn!(
                            container = SHARED_CONTAINER,
                            error = %err,
                            "shared MySQL would not restart, recreating"
                        );
                        self.recreate().await
                    }
                }
            }
            None if self.auto_create => {
                self.ensure_network().await?;
                self.create_container().await?;
                self.wait_until_ready(READY_TIMEOUT).await
            }
            None => Err(ProviderError::SharedUnavailable(format!(
                "{SHARED_CONTAINER} does not exist and auto-create is disabled"
            ))),
        }
    }

    async fn ensure_database(&self, name: &str) -> Result<(), ProviderError> {
        if !is_safe_db_name(name) {
            return Err(ProviderError::ProvisionFailed(format!(
                "unsafe database name: {name:?}"
            )));
        }

        let statement = format!(
            "CREATE DATABASE IF NOT EXISTS `{name}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci"
        );
        let output = Command::new("docker")
            .args([
                "exec",
                "-e",
                &format!("MYSQL_PWD={}", self.root_password),
                SHARED_CONTAINER,
                "mysql",
                "-uroot",
                "-e",
                &statement,
            ])
            .output()
            .await
            .map_err(|e| ProviderError::ProvisionFailed(e.to_string()))?;

        if output.status.success() {
            debug!(database = name, "environment schema ready");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProviderError::ProvisionFailed(format!(
                "could not create schema {name}: {}",
                tail(&stderr)
            )))
        }
    }

    fn network_name(&self) -> &str {
        SHARED_NETWORK
    }

    fn host_name(&self) -> &str {
        SHARED_CONTAINER
    }
}

/// Whether a schema name is safe to splice into a SQL statement.
///
/// Names come from experiment manifests, so they are untrusted input.
fn is_safe_db_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Last non-empty line of CLI output.
fn tail(output: &str) -> &str {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("no engine output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_schema_names() {
        assert!(is_safe_db_name("env_4f3a2b1c9d0e"));
        assert!(is_safe_db_name("experiment42"));
    }

    #[test]
    fn rejects_unsafe_schema_names() {
        assert!(!is_safe_db_name(""));
        assert!(!is_safe_db_name("drop table; --"));
        assert!(!is_safe_db_name("name`with`ticks"));
        assert!(!is_safe_db_name(&"x".repeat(65)));
    }
}
