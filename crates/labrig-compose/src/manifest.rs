// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Experiment manifest model.
//!
//! Every experiment package may ship a `metadata.json` describing how its
//! container should be assembled: runtime type, base image, start command,
//! ports, volumes, health probe, extra services, and an optional backing
//! database. All fields are optional; effective values fall back to the
//! resolved runtime strategy's defaults. Older manifests used `type`/`port`
//! and the flat `needsDatabase` trio; the effective accessors keep those
//! working alongside the structured fields that superseded them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parsed `metadata.json` for one experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentManifest {
    /// Human-readable experiment name.
    pub name: Option<String>,

    /// Legacy runtime type key, superseded by `runtime_type`.
    #[serde(rename = "type")]
    pub legacy_type: Option<String>,

    /// Runtime type key selecting a [`RuntimeStrategy`](crate::runtime::RuntimeStrategy).
    pub runtime_type: Option<String>,

    /// Container image for the primary service.
    pub base_image: Option<String>,

    /// Start command, subject to `${VAR}` substitution by the strategy.
    pub start_command: Option<String>,

    /// Legacy container port, superseded by `container_port`.
    pub port: Option<u16>,

    /// Port the application listens on inside the container.
    pub container_port: Option<u16>,

    /// Explicit `host:container` port mappings. When present these replace
    /// the automatically allocated mapping entirely.
    pub host_ports: Vec<String>,

    /// Extra environment variables merged over the strategy defaults.
    pub env: BTreeMap<String, String>,

    /// Volume mounts replacing the strategy defaults when non-empty.
    pub volumes: Vec<VolumeMount>,

    /// Health probe overriding the strategy default when present.
    pub health_check: Option<HealthProbe>,

    /// Additional compose services started alongside the primary one.
    pub services: Vec<ExtraService>,

    /// Legacy flat flag: experiment wants a shared MySQL schema.
    pub needs_database: Option<bool>,

    /// Legacy flat database name.
    pub database_name: Option<String>,

    /// Legacy flat database root password.
    pub database_password: Option<String>,

    /// Structured database settings, superseding the legacy trio.
    pub database: Option<DatabaseSettings>,
}

impl ExperimentManifest {
    /// Runtime type key, preferring the structured field over the legacy one.
    /// `None` means the experiment declared nothing and the default strategy
    /// applies without a fallback warning.
    pub fn effective_runtime(&self) -> Option<&str> {
        self.runtime_type
            .as_deref()
            .or(self.legacy_type.as_deref())
    }

    /// Declared container port, preferring the structured field.
    pub fn effective_container_port(&self) -> Option<u16> {
        self.container_port.or(self.port)
    }

    /// Database settings with the legacy flat fields folded in. Returns
    /// `None` when no database was requested.
    pub fn effective_database(&self) -> Option<DatabaseSettings> {
        if let Some(db) = &self.database {
            return db.enabled.then(|| db.clone());
        }
        if self.needs_database.unwrap_or(false) {
            return Some(DatabaseSettings {
                enabled: true,
                name: self
                    .database_name
                    .clone()
                    .unwrap_or_else(|| DatabaseSettings::default().name),
                password: self
                    .database_password
                    .clone()
                    .unwrap_or_else(|| DatabaseSettings::default().password),
                ..DatabaseSettings::default()
            });
        }
        None
    }
}

/// Backing-database request for an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Whether a database should be provisioned at all.
    pub enabled: bool,
    /// Provider key: `shared`, `standalone`, ...
    pub provider: String,
    /// Engine key: `mysql`, ...
    pub r#type: String,
    /// Schema name created for the environment.
    pub name: String,
    /// Username handed to the application.
    pub username: String,
    /// Root/user password.
    pub password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "shared".to_string(),
            r#type: "mysql".to_string(),
            name: "test_db".to_string(),
            username: "root".to_string(),
            password: "123456".to_string(),
        }
    }
}

impl DatabaseSettings {
    /// Composite registry key, `provider:type`.
    pub fn registry_key(&self) -> String {
        format!("{}:{}", self.provider, self.r#type)
    }
}

/// One bind mount of the primary service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeMount {
    /// Host side of the mount.
    pub host_path: String,
    /// Container side of the mount.
    pub container_path: String,
    /// Mount options including the leading colon, e.g. `:ro`. Empty for a
    /// plain writable mount.
    pub options: String,
}

impl VolumeMount {
    /// Compose short-syntax rendering, `host:container[:opts]`.
    pub fn render(&self) -> String {
        format!("{}:{}{}", self.host_path, self.container_path, self.options)
    }
}

/// Container health probe in compose terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthProbe {
    /// Exec-form test command, e.g. `["CMD", "curl", "-f", "http://..."]`.
    pub test: Vec<String>,
    /// Interval between probes.
    pub interval: String,
    /// Per-probe timeout.
    pub timeout: String,
    /// Failures tolerated before unhealthy.
    pub retries: u32,
    /// Grace period before probes count.
    pub start_period: String,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            test: Vec::new(),
            interval: "30s".to_string(),
            timeout: "10s".to_string(),
            retries: 3,
            start_period: "40s".to_string(),
        }
    }
}

/// Extra compose service declared by the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtraService {
    /// Service name in the compose document.
    pub name: String,
    /// Container image.
    pub image: String,
    /// Optional command override.
    pub command: Option<String>,
    /// `host:container` port mappings.
    pub ports: Vec<String>,
    /// Environment variables.
    pub environment: BTreeMap<String, String>,
    /// Bind mounts in compose short syntax.
    pub volumes: Vec<String>,
    /// Services this one depends on.
    pub depends_on: Vec<String>,
    /// Networks to attach; defaults to the environment network when empty.
    pub networks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_fields_win_over_legacy() {
        let manifest: ExperimentManifest = serde_json::from_str(
            r#"{"type": "node", "runtimeType": "python", "port": 3000, "containerPort": 8000}"#,
        )
        .unwrap();
        assert_eq!(manifest.effective_runtime(), Some("python"));
        assert_eq!(manifest.effective_container_port(), Some(8000));
    }

    #[test]
    fn legacy_fields_still_apply() {
        let manifest: ExperimentManifest =
            serde_json::from_str(r#"{"type": "node", "port": 3000}"#).unwrap();
        assert_eq!(manifest.effective_runtime(), Some("node"));
        assert_eq!(manifest.effective_container_port(), Some(3000));
    }

    #[test]
    fn empty_manifest_has_no_opinions() {
        let manifest = ExperimentManifest::default();
        assert_eq!(manifest.effective_runtime(), None);
        assert_eq!(manifest.effective_container_port(), None);
        assert!(manifest.effective_database().is_none());
    }

    #[test]
    fn legacy_database_trio_builds_shared_settings() {
        let manifest: ExperimentManifest = serde_json::from_str(
            r#"{"needsDatabase": true, "databaseName": "exp42", "databasePassword": "s3cret"}"#,
        )
        .unwrap();
        let db = manifest.effective_database().unwrap();
        assert!(db.enabled);
        assert_eq!(db.provider, "shared");
        assert_eq!(db.name, "exp42");
        assert_eq!(db.password, "s3cret");
        assert_eq!(db.registry_key(), "shared:mysql");
    }

    #[test]
    fn disabled_structured_database_is_none() {
        let manifest: ExperimentManifest = serde_json::from_str(
            r#"{"database": {"enabled": false, "name": "ignored"}, "needsDatabase": true}"#,
        )
        .unwrap();
        // The structured block is authoritative even when disabled.
        assert!(manifest.effective_database().is_none());
    }
}
