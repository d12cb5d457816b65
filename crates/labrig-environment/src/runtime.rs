// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for labrig-environment.
//!
//! This module provides [`EnvironmentRuntime`] which wires the store, port
//! allocator, spec compiler, and container driver into a ready-to-use
//! [`EnvironmentOrchestrator`] for embedding into an existing tokio
//! application.
//!
//! # Example
//!
//! ```rust,ignore
//! use labrig_environment::config::Config;
//! use labrig_environment::runtime::EnvironmentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pool = sqlx::PgPool::connect(&config.database_url).await?;
//!     labrig_environment::migrations::run(&pool).await?;
//!
//!     let runtime = EnvironmentRuntime::builder()
//!         .pool(pool)
//!         .config(config)
//!         .build()?;
//!
//!     let env = runtime
//!         .orchestrator()
//!         .create_env("user-1", None, "experiment-1")
//!         .await?;
//!     println!("environment ready at {}", env.url);
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;

use labrig_compose::{ComposeCompiler, ProviderRegistry, SharedDatabase, SpecCompiler};

use crate::config::Config;
use crate::driver::{ComposeDriver, ContainerDriver};
use crate::orchestrator::EnvironmentOrchestrator;
use crate::port::PortAllocator;
use crate::shared_db::SharedDbManager;
use crate::store::{EnvironmentStore, PgEnvironmentStore};

/// Builder for creating an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeBuilder {
    pool: Option<PgPool>,
    store: Option<Arc<dyn EnvironmentStore>>,
    driver: Option<Arc<dyn ContainerDriver>>,
    port_range_start: u16,
    port_range_end: u16,
    server_host: String,
    apps_base: PathBuf,
    user_envs_base: PathBuf,
    health_timeout: Duration,
    shared_db_password: String,
    shared_db_auto_create: bool,
}

impl Default for EnvironmentRuntimeBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            store: None,
            driver: None,
            port_range_start: 18000,
            port_range_end: 19999,
            server_host: "localhost".to_string(),
            apps_base: PathBuf::from("/opt/labrig/apps"),
            user_envs_base: PathBuf::from("/opt/labrig/user-envs"),
            health_timeout: Duration::from_secs(30),
            shared_db_password: "123456".to_string(),
            shared_db_auto_create: false,
        }
    }
}

impl EnvironmentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the PostgreSQL connection pool (required unless a store is set).
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Apply every setting from a [`Config`], usually read from the
    /// environment via [`Config::from_env`]. The pool is not part of
    /// [`Config`] and still has to be provided separately.
    pub fn config(mut self, config: Config) -> Self {
        self.port_range_start = config.port_range_start;
        self.port_range_end = config.port_range_end;
        self.server_host = config.server_host;
        self.apps_base = config.apps_base;
        self.user_envs_base = config.user_envs_base;
        self.health_timeout = config.health_timeout;
        self.shared_db_password = config.shared_db_password;
        self.shared_db_auto_create = config.shared_db_auto_create;
        self
    }

    /// Replace the environment store. When set, the pool is not required.
    pub fn store(mut self, store: Arc<dyn EnvironmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the container driver.
    ///
    /// Default: [`ComposeDriver`] with the configured health timeout.
    pub fn driver(mut self, driver: Arc<dyn ContainerDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Set the inclusive host port range for allocation.
    ///
    /// Default: `18000..=19999`
    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range_start = start;
        self.port_range_end = end;
        self
    }

    /// Set the hostname used in environment URLs.
    ///
    /// Default: `localhost`
    pub fn server_host(mut self, host: impl Into<String>) -> Self {
        self.server_host = host.into();
        self
    }

    /// Set the directory experiment packages are read from.
    ///
    /// Default: `/opt/labrig/apps`
    pub fn apps_base(mut self, path: impl Into<PathBuf>) -> Self {
        self.apps_base = path.into();
        self
    }

    /// Set the directory environment directories are written under.
    ///
    /// Default: `/opt/labrig/user-envs`
    pub fn user_envs_base(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_envs_base = path.into();
        self
    }

    /// Set the soft deadline for container health waits.
    ///
    /// Default: 30 seconds
    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Set the root password for the shared MySQL container.
    pub fn shared_db_password(mut self, password: impl Into<String>) -> Self {
        self.shared_db_password = password.into();
        self
    }

    /// Set whether the shared MySQL container is created on first use.
    ///
    /// Default: `false`; shared database requests then fail until the
    /// container is provisioned out of band.
    pub fn shared_db_auto_create(mut self, auto_create: bool) -> Self {
        self.shared_db_auto_create = auto_create;
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required fields are missing or inconsistent.
    pub fn build(self) -> Result<EnvironmentRuntime> {
        if self.port_range_start > self.port_range_end {
            return Err(anyhow::anyhow!("port range start exceeds end"));
        }

        let store: Arc<dyn EnvironmentStore> = match self.store {
            Some(store) => store,
            None => {
                let pool = self
                    .pool
                    .ok_or_else(|| anyhow::anyhow!("pool is required when no store is set"))?;
                Arc::new(PgEnvironmentStore::new(pool))
            }
        };

        let driver: Arc<dyn ContainerDriver> = match self.driver {
            Some(driver) => driver,
            None => Arc::new(ComposeDriver::new(self.health_timeout)),
        };

        let shared_db = Arc::new(SharedDbManager::new(
            self.shared_db_password,
            self.shared_db_auto_create,
        ));
        let shared: Arc<dyn SharedDatabase> = shared_db.clone();
        let registry = Arc::new(ProviderRegistry::with_builtins(Some(shared)));
        let compiler: Arc<dyn SpecCompiler> = Arc::new(ComposeCompiler::new(
            self.apps_base,
            self.user_envs_base,
            registry.clone(),
        ));

        let allocator =
            PortAllocator::new(store.clone(), self.port_range_start, self.port_range_end);
        let orchestrator = Arc::new(EnvironmentOrchestrator::new(
            store.clone(),
            allocator,
            driver,
            compiler,
            registry,
            self.server_host,
        ));

        Ok(EnvironmentRuntime {
            orchestrator,
            store,
            shared_db,
        })
    }
}

/// A fully wired environment runtime.
pub struct EnvironmentRuntime {
    orchestrator: Arc<EnvironmentOrchestrator>,
    store: Arc<dyn EnvironmentStore>,
    shared_db: Arc<SharedDbManager>,
}

impl EnvironmentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EnvironmentRuntimeBuilder {
        EnvironmentRuntimeBuilder::new()
    }

    /// The lifecycle orchestrator.
    pub fn orchestrator(&self) -> &Arc<EnvironmentOrchestrator> {
        &self.orchestrator
    }

    /// The backing environment store, for read-side queries.
    pub fn store(&self) -> &Arc<dyn EnvironmentStore> {
        &self.store
    }

    /// The shared MySQL manager, for out-of-band administration
    /// ([`SharedDbManager::stop`], [`SharedDbManager::destroy`]).
    pub fn shared_db(&self) -> &Arc<SharedDbManager> {
        &self.shared_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default_values() {
        let builder = EnvironmentRuntimeBuilder::default();

        assert!(builder.pool.is_none());
        assert!(builder.store.is_none());
        assert!(builder.driver.is_none());
        assert_eq!(builder.port_range_start, 18000);
        assert_eq!(builder.port_range_end, 19999);
        assert_eq!(builder.server_host, "localhost");
        assert_eq!(builder.apps_base, PathBuf::from("/opt/labrig/apps"));
        assert_eq!(builder.user_envs_base, PathBuf::from("/opt/labrig/user-envs"));
        assert_eq!(builder.health_timeout, Duration::from_secs(30));
        assert!(!builder.shared_db_auto_create);
    }

    #[test]
    fn test_builder_new_equals_default() {
        let builder_new = EnvironmentRuntimeBuilder::new();
        let builder_default = EnvironmentRuntimeBuilder::default();

        assert_eq!(builder_new.port_range_start, builder_default.port_range_start);
        assert_eq!(builder_new.port_range_end, builder_default.port_range_end);
        assert_eq!(builder_new.server_host, builder_default.server_host);
        assert_eq!(builder_new.apps_base, builder_default.apps_base);
    }

    #[test]
    fn test_builder_port_range() {
        let builder = EnvironmentRuntimeBuilder::new().port_range(18000, 18002);

        assert_eq!(builder.port_range_start, 18000);
        assert_eq!(builder.port_range_end, 18002);
    }

    #[test]
    fn test_builder_server_host() {
        let builder = EnvironmentRuntimeBuilder::new().server_host("labrig.example.org");

        assert_eq!(builder.server_host, "labrig.example.org");
    }

    #[test]
    fn test_builder_paths() {
        let builder = EnvironmentRuntimeBuilder::new()
            .apps_base("/srv/apps")
            .user_envs_base("/srv/envs");

        assert_eq!(builder.apps_base, PathBuf::from("/srv/apps"));
        assert_eq!(builder.user_envs_base, PathBuf::from("/srv/envs"));
    }

    #[test]
    fn test_builder_config_applies_every_setting() {
        let config = Config {
            database_url: "postgres://unused".to_string(),
            port_range_start: 20000,
            port_range_end: 20010,
            server_host: "lab.internal".to_string(),
            apps_base: PathBuf::from("/srv/apps"),
            user_envs_base: PathBuf::from("/srv/envs"),
            health_timeout: Duration::from_secs(5),
            shared_db_password: "secret".to_string(),
            shared_db_auto_create: true,
        };

        let builder = EnvironmentRuntimeBuilder::new().config(config);

        assert_eq!(builder.port_range_start, 20000);
        assert_eq!(builder.port_range_end, 20010);
        assert_eq!(builder.server_host, "lab.internal");
        assert_eq!(builder.health_timeout, Duration::from_secs(5));
        assert_eq!(builder.shared_db_password, "secret");
        assert!(builder.shared_db_auto_create);
    }

    #[test]
    fn test_builder_build_fails_without_pool() {
        let result = EnvironmentRuntimeBuilder::new().build();

        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("pool is required"));
        }
    }

    #[test]
    fn test_builder_build_rejects_inverted_port_range() {
        let result = EnvironmentRuntimeBuilder::new()
            .port_range(19000, 18000)
            .build();

        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("port range"));
        }
    }

    #[test]
    fn test_builder_build_with_store_needs_no_pool() {
        use crate::store::MemoryStore;

        let runtime = EnvironmentRuntimeBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        assert_eq!(runtime.shared_db().host_name(), "shared-mysql");
    }

    #[test]
    fn test_runtime_builder_static_method() {
        let builder = EnvironmentRuntime::builder();

        assert_eq!(builder.port_range_start, 18000);
        assert_eq!(builder.server_host, "localhost");
    }
}
