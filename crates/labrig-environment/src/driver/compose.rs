// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container driver backed by the `docker compose` CLI.
//!
//! Every project operation shells out to `docker compose -f <file> -p <project>`
//! so the driver works against whatever engine the host's `docker` binary talks
//! to. The project namespace is derived per directory; see
//! [`ComposeDriver::derive_project_name`] for the fallback chain that keeps
//! namespaces unique even when spec files are missing or corrupt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use labrig_compose::{COMPOSE_FILE, ENV_FILE};

use crate::driver::ContainerDriver;
use crate::error::{Error, Result};

/// How often a starting container's health status is polled.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default soft deadline for the health wait.
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine error fingerprints that mean the daemon itself is unreachable.
const DAEMON_DOWN_MARKERS: [&str; 4] = [
    "cannot connect to the docker daemon",
    "error during connect",
    "connection refused",
    "dockerdesktoplinuxengine",
];

/// Engine error fingerprints for a missing or unpullable image.
const IMAGE_MARKERS: [&str; 4] = [
    "unable to get image",
    "pull access denied",
    "image not found",
    "manifest unknown",
];

/// Engine error fingerprints for a host port conflict.
const PORT_MARKERS: [&str; 2] = ["port is already allocated", "bind: address already in use"];

/// Engine error fingerprints for a socket permission problem.
const PERMISSION_MARKERS: [&str; 2] = ["permission denied", "access denied"];

/// [`ContainerDriver`] implementation that drives `docker compose`.
pub struct ComposeDriver {
    health_timeout: Duration,
}

impl Default for ComposeDriver {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_TIMEOUT)
    }
}

impl ComposeDriver {
    /// Create a driver with the given soft deadline for health waits.
    pub fn new(health_timeout: Duration) -> Self {
        Self { health_timeout }
    }

    /// Derive the compose project name for a spec directory.
    ///
    /// Namespaces two projects apart even when their service names collide.
    /// Fallback chain:
    /// 1. `container_name` of the first service in the compose file
    /// 2. `ENV_ID` (or `CONTAINER_NAME`) recorded in the `.env` file
    /// 3. `env-` plus a hash of the absolute directory path
    /// 4. a random identifier
    pub fn derive_project_name(dir: &Path) -> String {
        if let Some(name) = project_name_from_compose_file(&dir.join(COMPOSE_FILE)) {
            return name;
        }
        if let Some(name) = project_name_from_env_file(&dir.join(ENV_FILE)) {
            return name;
        }
        if let Some(name) = project_name_from_path(dir) {
            return name;
        }
        let fallback = format!("env-{}", &Uuid::new_v4().simple().to_string()[..12]);
        warn!(dir = %dir.display(), project = %fallback, "no stable project name source, using random namespace");
        fallback
    }

    /// Run `docker compose` against the project in `dir`.
    ///
    /// Returns the exit success flag and the combined stdout/stderr, since
    /// compose splits its diagnostics across both streams.
    async fn compose(&self, dir: &Path, args: &[&str]) -> std::io::Result<(bool, String)> {
        let file = dir.join(COMPOSE_FILE);
        let project = Self::derive_project_name(dir);

        let output = Command::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&file)
            .arg("-p")
            .arg(&project)
            .args(args)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), combined))
    }

    /// Resolve the engine id of the project's primary container via `ps -q`.
    async fn primary_container_id(&self, dir: &Path) -> Result<Option<String>> {
        let (ok, output) = self.compose(dir, &["ps", "-q"]).await?;
        if !ok {
            return Ok(None);
        }
        Ok(output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }

    /// Read one `docker inspect` format expression for a container.
    async fn inspect(&self, container: &str, format: &str) -> Option<String> {
        let output = Command::new("docker")
            .args(["inspect", "--format", format, container])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() || value == "<no value>" {
            return None;
        }
        Some(value)
    }

    /// Poll the container until it reports healthy or the soft deadline hits.
    ///
    /// Containers without a configured health probe count as ready as soon as
    /// they are running. A deadline overrun is logged and tolerated; some
    /// workloads legitimately take longer to warm up than we wait.
    async fn wait_for_healthy(&self, container: &str) {
        let deadline = Instant::now() + self.health_timeout;
        loop {
            match self
                .inspect(container, "{{.State.Health.Status}}")
                .await
                .as_deref()
            {
                Some("healthy") => {
                    debug!(container, "container is healthy");
                    return;
                }
                Some("starting") | Some("unhealthy") => {}
                _ => {
                    let running = self
                        .inspect(container, "{{.State.Running}}")
                        .await
                        .as_deref()
                        == Some("true");
                    if running {
                        debug!(container, "container has no health probe, running is enough");
                        return;
                    }
                }
            }

            if Instant::now() >= deadline {
                warn!(container, timeout_secs = self.health_timeout.as_secs(), "health wait timed out, continuing");
                return;
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    /// List container names matching a name filter, exactly.
    async fn names_matching(&self, name: &str, include_stopped: bool) -> Vec<String> {
        let mut cmd = Command::new("docker");
        cmd.arg("ps");
        if include_stopped {
            cmd.arg("-a");
        }
        cmd.args(["--filter", &format!("name={name}"), "--format", "{{.Names}}"]);

        match cmd.output().await {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl ContainerDriver for ComposeDriver {
    async fn engine_available(&self) -> bool {
        match Command::new("docker").args(["ps", "-q"]).output().await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn start(&self, dir: &Path, wait_for_healthy: bool) -> Result<String> {
        let (ok, output) = self.compose(dir, &["up", "-d"]).await?;
        if !ok {
            return Err(Error::ContainerStartFailed(classify_engine_error(&output)));
        }

        let container = self.primary_container_id(dir).await?.ok_or_else(|| {
            Error::ContainerStartFailed(
                "project came up but no container id could be resolved".to_string(),
            )
        })?;

        if wait_for_healthy {
            self.wait_for_healthy(&container).await;
        }

        info!(dir = %dir.display(), container, "project started");
        Ok(container)
    }

    async fn start_existing(&self, dir: &Path) -> Result<String> {
        let (ok, output) = self.compose(dir, &["start"]).await?;
        if !ok {
            return Err(Error::ContainerStartFailed(classify_engine_error(&output)));
        }

        // `compose start` exits zero even when the containers were removed
        // out-of-band, so verify one actually came back up.
        let container = self.primary_container_id(dir).await?.ok_or_else(|| {
            Error::ContainerNotFound(format!(
                "no container found for project in {}, recreate required",
                dir.display()
            ))
        })?;

        let running =
            self.inspect(&container, "{{.State.Running}}").await.as_deref() == Some("true");
        if !running {
            return Err(Error::ContainerNotFound(format!(
                "container {container} did not come back up, recreate required"
            )));
        }

        info!(dir = %dir.display(), container, "project resumed");
        Ok(container)
    }

    async fn down(&self, dir: &Path, remove_volumes: bool) {
        let args: &[&str] = if remove_volumes {
            &["down", "-v"]
        } else {
            &["down"]
        };

        match self.compose(dir, args).await {
            Ok((true, _)) => {
                debug!(dir = %dir.display(), remove_volumes, "project torn down");
            }
            Ok((false, output)) => {
                warn!(dir = %dir.display(), error = %last_line(&output), "project teardown reported errors");
            }
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "could not invoke engine for teardown");
            }
        }
    }

    async fn stop_only(&self, dir: &Path) -> Result<()> {
        let (ok, output) = self.compose(dir, &["stop"]).await?;
        if !ok {
            return Err(Error::ContainerStopFailed(last_line(&output).to_string()));
        }
        info!(dir = %dir.display(), "project stopped");
        Ok(())
    }

    async fn exists(&self, container_ref: &str) -> bool {
        self.inspect(container_ref, "{{.Id}}").await.is_some()
    }

    async fn exists_by_name(&self, name: &str) -> bool {
        self.names_matching(name, true)
            .await
            .iter()
            .any(|candidate| candidate == name)
    }

    async fn running_by_name(&self, name: &str) -> bool {
        self.names_matching(name, false)
            .await
            .iter()
            .any(|candidate| candidate == name)
    }

    async fn force_remove_by_name(&self, name: &str) {
        match Command::new("docker").args(["rm", "-f", name]).output().await {
            Ok(output) if output.status.success() => {
                debug!(name, "container force-removed");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(name, error = %last_line(&stderr), "force remove failed");
            }
            Err(err) => {
                warn!(name, error = %err, "could not invoke engine for force remove");
            }
        }
    }
}

/// Map raw engine output to an actionable message.
///
/// Compose errors tend to bury the cause under progress noise; the marker
/// tables pick out the common operational failures and attach a remediation
/// hint, keeping the last raw line for context.
fn classify_engine_error(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let detail = last_line(raw);

    if DAEMON_DOWN_MARKERS.iter().any(|m| lowered.contains(m)) {
        return format!("container engine daemon is not running, start it and retry: {detail}");
    }
    if IMAGE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return format!("container image unavailable, check the image name and registry access: {detail}");
    }
    if PORT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return format!("host port is already bound by another process: {detail}");
    }
    if PERMISSION_MARKERS.iter().any(|m| lowered.contains(m)) {
        return format!("permission denied talking to the container engine, check the daemon socket permissions: {detail}");
    }
    detail.to_string()
}

/// Last non-empty line of engine output, where the actual error usually sits.
fn last_line(raw: &str) -> &str {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("no engine output")
}

/// Project name from the first service `container_name` in the compose file.
fn project_name_from_compose_file(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw).ok()?;
    let services = doc.get("services")?.as_mapping()?;
    for (_, service) in services {
        if let Some(name) = service.get("container_name").and_then(|v| v.as_str()) {
            if let Some(sanitized) = sanitize_project_name(name) {
                return Some(sanitized);
            }
        }
    }
    None
}

/// Project name from the identifier recorded in the project's `.env` file.
fn project_name_from_env_file(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    for key in ["ENV_ID=", "CONTAINER_NAME="] {
        for line in raw.lines() {
            if let Some(value) = line.strip_prefix(key) {
                if let Some(sanitized) = sanitize_project_name(value) {
                    return Some(sanitized);
                }
            }
        }
    }
    None
}

/// Stable project name hashed from the directory's absolute path.
fn project_name_from_path(dir: &Path) -> Option<String> {
    let absolute: PathBuf = match dir.canonicalize() {
        Ok(path) => path,
        Err(_) if dir.is_absolute() => dir.to_path_buf(),
        Err(_) => std::env::current_dir().ok()?.join(dir),
    };
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let hex = format!("{digest:x}");
    Some(format!("env-{}", &hex[..12]))
}

/// Normalize a raw identifier into a valid compose project name.
///
/// Compose requires `[a-z0-9][a-z0-9_-]*`. Returns `None` when nothing of the
/// input survives, so callers fall through to the next naming source.
fn sanitize_project_name(raw: &str) -> Option<String> {
    let mapped: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = mapped.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn classifies_daemon_down_errors() {
        let raw = "Cannot connect to the Docker daemon at unix:///var/run/docker.sock";
        let message = classify_engine_error(raw);
        assert!(message.contains("daemon is not running"), "{message}");
        assert!(message.contains("docker.sock"), "{message}");
    }

    #[test]
    fn classifies_image_and_port_errors() {
        let image = classify_engine_error("Error response from daemon: pull access denied for acme/app");
        assert!(image.contains("image unavailable"), "{image}");

        let port = classify_engine_error("Error: bind: address already in use");
        assert!(port.contains("port is already bound"), "{port}");
    }

    #[test]
    fn classifies_permission_errors_and_falls_back_to_last_line() {
        let perm = classify_engine_error("got permission denied while trying to connect");
        assert!(perm.contains("socket permissions"), "{perm}");

        let other = classify_engine_error("some progress noise\n\nservice \"app\" has neither an image nor a build context\n");
        assert_eq!(other, "service \"app\" has neither an image nor a build context");

        assert_eq!(classify_engine_error(""), "no engine output");
    }

    #[test]
    fn sanitizes_project_names() {
        assert_eq!(sanitize_project_name("env-4f3a2b1c9d0e").as_deref(), Some("env-4f3a2b1c9d0e"));
        assert_eq!(sanitize_project_name("My App!").as_deref(), Some("my-app-"));
        assert_eq!(sanitize_project_name("--Env.1").as_deref(), Some("env-1"));
        assert_eq!(sanitize_project_name("***").as_deref(), None);
        assert_eq!(sanitize_project_name("").as_deref(), None);
    }

    #[test]
    fn derives_project_name_from_compose_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(COMPOSE_FILE),
            "services:\n  app:\n    image: nginx\n    container_name: env-aabbccddeeff\n",
        )
        .unwrap();

        assert_eq!(
            ComposeDriver::derive_project_name(dir.path()),
            "env-aabbccddeeff"
        );
    }

    #[test]
    fn falls_back_to_env_file_when_compose_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(COMPOSE_FILE), "services: [not: valid").unwrap();
        std::fs::write(
            dir.path().join(ENV_FILE),
            "APP_PORT=18000\nENV_ID=env-123456789abc\n",
        )
        .unwrap();

        assert_eq!(
            ComposeDriver::derive_project_name(dir.path()),
            "env-123456789abc"
        );
    }

    #[test]
    fn hashes_the_path_when_no_spec_files_exist() {
        let dir = TempDir::new().unwrap();
        let first = ComposeDriver::derive_project_name(dir.path());
        let second = ComposeDriver::derive_project_name(dir.path());

        assert!(first.starts_with("env-"), "{first}");
        assert_eq!(first.len(), "env-".len() + 12);
        assert_eq!(first, second, "path-derived names must be stable");
    }

    #[test]
    fn distinct_directories_get_distinct_namespaces() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        assert_ne!(
            ComposeDriver::derive_project_name(first.path()),
            ComposeDriver::derive_project_name(second.path())
        );
    }
}
