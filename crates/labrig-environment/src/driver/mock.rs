// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container driver for testing.
//!
//! Simulates engine behavior in memory without touching a real container
//! engine, and records every call so tests can assert on the exact startup
//! and teardown sequences the orchestrator issues.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::error::{Error, Result};

/// One simulated container.
#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    name: String,
    dir: PathBuf,
    running: bool,
}

/// Mock driver for testing.
pub struct MockDriver {
    containers: Arc<Mutex<Vec<MockContainer>>>,
    calls: Arc<Mutex<Vec<String>>>,
    counter: AtomicU64,
    /// Whether the simulated engine daemon is reachable.
    pub engine_up: AtomicBool,
    /// If true, `start` fails with a start error.
    pub fail_start: AtomicBool,
    /// If true, `start_existing` fails as if the container was removed.
    pub fail_resume: AtomicBool,
    /// If true, `stop_only` fails with a stop error.
    pub fail_stop: AtomicBool,
    /// If true, `down` silently leaves containers behind.
    pub fail_down: AtomicBool,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a mock driver with a healthy engine.
    pub fn new() -> Self {
        Self {
            containers: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            counter: AtomicU64::new(0),
            engine_up: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_down: AtomicBool::new(false),
        }
    }

    /// Create a mock driver whose `start` always fails.
    pub fn failing() -> Self {
        Self {
            fail_start: AtomicBool::new(true),
            ..Self::new()
        }
    }

    /// Create a mock driver whose engine daemon is unreachable.
    pub fn engine_down() -> Self {
        Self {
            engine_up: AtomicBool::new(false),
            ..Self::new()
        }
    }

    /// Register a container directly, bypassing `start`.
    pub async fn seed_container(&self, name: &str, dir: &Path, running: bool) {
        let mut containers = self.containers.lock().await;
        containers.push(MockContainer {
            id: format!("{name}-id"),
            name: name.to_string(),
            dir: dir.to_path_buf(),
            running,
        });
    }

    /// Remove a container as if it was deleted out-of-band.
    pub async fn remove_container(&self, name_or_id: &str) {
        let mut containers = self.containers.lock().await;
        containers.retain(|c| c.name != name_or_id && c.id != name_or_id);
    }

    /// Every driver call recorded so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    /// Number of containers currently registered, running or not.
    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("mock-{n:012}")
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn engine_available(&self) -> bool {
        self.engine_up.load(Ordering::SeqCst)
    }

    async fn start(&self, dir: &Path, wait_for_healthy: bool) -> Result<String> {
        self.record(format!("up {} wait={wait_for_healthy}", dir.display()))
            .await;

        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::ContainerStartFailed(
                "mock engine refused to start the project".to_string(),
            ));
        }

        let id = self.next_id();
        let mut containers = self.containers.lock().await;
        containers.retain(|c| c.dir != dir);
        containers.push(MockContainer {
            id: id.clone(),
            name: id.clone(),
            dir: dir.to_path_buf(),
            running: true,
        });
        Ok(id)
    }

    async fn start_existing(&self, dir: &Path) -> Result<String> {
        self.record(format!("start {}", dir.display())).await;

        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(Error::ContainerNotFound(
                "mock container was removed out-of-band".to_string(),
            ));
        }

        let mut containers = self.containers.lock().await;
        match containers.iter_mut().find(|c| c.dir == dir) {
            Some(container) => {
                container.running = true;
                Ok(container.id.clone())
            }
            None => Err(Error::ContainerNotFound(format!(
                "no container found for project in {}",
                dir.display()
            ))),
        }
    }

    async fn down(&self, dir: &Path, remove_volumes: bool) {
        self.record(format!("down {} volumes={remove_volumes}", dir.display()))
            .await;

        if self.fail_down.load(Ordering::SeqCst) {
            return;
        }
        let mut containers = self.containers.lock().await;
        containers.retain(|c| c.dir != dir);
    }

    async fn stop_only(&self, dir: &Path) -> Result<()> {
        self.record(format!("stop {}", dir.display())).await;

        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::ContainerStopFailed(
                "mock engine refused to stop the project".to_string(),
            ));
        }

        let mut containers = self.containers.lock().await;
        for container in containers.iter_mut().filter(|c| c.dir == dir) {
            container.running = false;
        }
        Ok(())
    }

    async fn exists(&self, container_ref: &str) -> bool {
        let containers = self.containers.lock().await;
        containers.iter().any(|c| c.id == container_ref)
    }

    async fn exists_by_name(&self, name: &str) -> bool {
        let containers = self.containers.lock().await;
        containers.iter().any(|c| c.name == name)
    }

    async fn running_by_name(&self, name: &str) -> bool {
        let containers = self.containers.lock().await;
        containers.iter().any(|c| c.name == name && c.running)
    }

    async fn force_remove_by_name(&self, name: &str) {
        self.record(format!("rm -f {name}")).await;
        let mut containers = self.containers.lock().await;
        containers.retain(|c| c.name != name);
    }
}
