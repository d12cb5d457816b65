// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for labrig-environment integration tests.
//!
//! Provides a fully mocked orchestrator stack for lifecycle tests and pool
//! helpers for the PostgreSQL-backed store tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use sqlx::PgPool;
use tempfile::TempDir;

use labrig_compose::{
    CompileError, ExperimentManifest, MaterializeRequest, MaterializedSpec, ProviderRegistry,
    SpecCompiler,
};
use labrig_environment::driver::MockDriver;
use labrig_environment::orchestrator::EnvironmentOrchestrator;
use labrig_environment::port::PortAllocator;
use labrig_environment::store::{EnvironmentStore, MemoryStore};

/// Environment variable naming the PostgreSQL test database.
pub const TEST_DB_VAR: &str = "TEST_LABRIG_DATABASE_URL";

/// Helper macro to skip tests if the test database URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_LABRIG_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_LABRIG_DATABASE_URL not set");
            return;
        }
    };
}

/// Install a log subscriber once for the whole test binary, honoring
/// `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "labrig_environment=debug".into()),
            )
            .with_test_writer()
            .init();
    });
}

/// Connect to the test database and apply migrations.
pub async fn test_pool() -> PgPool {
    let url = std::env::var(TEST_DB_VAR).expect("TEST_LABRIG_DATABASE_URL not set");
    let pool = PgPool::connect(&url)
        .await
        .expect("failed to connect to test database");
    labrig_environment::migrations::run(&pool)
        .await
        .expect("failed to run migrations");
    pool
}

/// A port unlikely to collide with other tests sharing the database.
pub fn unique_port() -> u16 {
    20000 + (uuid::Uuid::new_v4().as_u128() % 30000) as u16
}

/// Spec compiler stub that lays out bare work directories under a temp root
/// and serves one fixed manifest for every experiment.
pub struct MockCompiler {
    root: PathBuf,
    manifest: ExperimentManifest,
    removed: Mutex<Vec<PathBuf>>,
}

impl MockCompiler {
    pub fn new(root: &Path, manifest: ExperimentManifest) -> Self {
        Self {
            root: root.to_path_buf(),
            manifest,
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Directories `remove_work_dir` has been asked to delete, in order.
    pub fn removed_dirs(&self) -> Vec<PathBuf> {
        self.removed.lock().unwrap().clone()
    }

    /// The work directory this compiler materializes for a key.
    pub fn work_dir_for(&self, owner: &str, group: &str, experiment: &str) -> PathBuf {
        self.root.join(owner).join(group).join(experiment)
    }
}

#[async_trait]
impl SpecCompiler for MockCompiler {
    async fn load_manifest(&self, _experiment: &str) -> Result<ExperimentManifest, CompileError> {
        Ok(self.manifest.clone())
    }

    async fn materialize(
        &self,
        req: MaterializeRequest<'_>,
    ) -> Result<MaterializedSpec, CompileError> {
        let work_dir = self.work_dir_for(req.owner, req.group, req.experiment);
        tokio::fs::create_dir_all(&work_dir).await?;
        Ok(MaterializedSpec {
            work_dir,
            container_name: req.env_id.to_string(),
            network_name: format!("{}-net", req.env_id),
        })
    }

    async fn remove_work_dir(&self, work_dir: &Path) -> Result<(), CompileError> {
        self.removed.lock().unwrap().push(work_dir.to_path_buf());
        match tokio::fs::remove_dir_all(work_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fully mocked orchestrator stack with handles to every collaborator.
pub struct TestStack {
    pub orchestrator: EnvironmentOrchestrator,
    pub store: Arc<MemoryStore>,
    pub driver: Arc<MockDriver>,
    pub compiler: Arc<MockCompiler>,
    _root: TempDir,
}

impl TestStack {
    /// Stack with a healthy engine and the default manifest.
    pub fn new() -> Self {
        Self::with(MockDriver::new(), ExperimentManifest::default(), 18000, 19999)
    }

    /// Stack with a custom driver and the default manifest.
    pub fn with_driver(driver: MockDriver) -> Self {
        Self::with(driver, ExperimentManifest::default(), 18000, 19999)
    }

    /// Stack with a custom manifest served for every experiment.
    pub fn with_manifest(manifest: ExperimentManifest) -> Self {
        Self::with(MockDriver::new(), manifest, 18000, 19999)
    }

    /// Stack with a custom port range.
    pub fn with_port_range(start: u16, end: u16) -> Self {
        Self::with(MockDriver::new(), ExperimentManifest::default(), start, end)
    }

    pub fn with(
        driver: MockDriver,
        manifest: ExperimentManifest,
        port_start: u16,
        port_end: u16,
    ) -> Self {
        let root = TempDir::new().expect("failed to create temp dir");
        let store = Arc::new(MemoryStore::new());
        let driver = Arc::new(driver);
        let compiler = Arc::new(MockCompiler::new(root.path(), manifest));
        let registry = Arc::new(ProviderRegistry::with_builtins(None));

        let store_dyn: Arc<dyn EnvironmentStore> = store.clone();
        let allocator = PortAllocator::new(store_dyn.clone(), port_start, port_end);
        let orchestrator = EnvironmentOrchestrator::new(
            store_dyn,
            allocator,
            driver.clone(),
            compiler.clone(),
            registry,
            "localhost",
        );

        Self {
            orchestrator,
            store,
            driver,
            compiler,
            _root: root,
        }
    }
}
