// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed compose document.
//!
//! A small, purpose-built model of the compose file subset labrig emits.
//! Field names mirror the compose schema so the document serializes directly
//! with serde_yaml; anything unset is omitted rather than emitted empty.

use std::collections::BTreeMap;

use serde::Serialize;

/// Root of a generated `docker-compose.yml`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposeDocument {
    /// Services keyed by name. The primary service is always `app`.
    pub services: BTreeMap<String, ComposeService>,
    /// Networks referenced by the services.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ComposeNetwork>,
}

impl ComposeDocument {
    /// Serializes the document to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// One service entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposeService {
    /// Container image.
    pub image: String,
    /// Fixed container name; the driver derives the project namespace from it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Command override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Working directory inside the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Allocate a pseudo-TTY.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tty: Option<bool>,
    /// Keep stdin open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin_open: Option<bool>,
    /// `host:container` port mappings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Bind mounts in short syntax.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Environment variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Networks this service joins.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Services that must be started first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Restart policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Health probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<ComposeHealthcheck>,
}

/// Compose healthcheck block.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeHealthcheck {
    /// Exec-form test command.
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

impl From<crate::manifest::HealthProbe> for ComposeHealthcheck {
    fn from(probe: crate::manifest::HealthProbe) -> Self {
        Self {
            test: probe.test,
            interval: probe.interval,
            timeout: probe.timeout,
            retries: probe.retries,
            start_period: probe.start_period,
        }
    }
}

/// Compose network definition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposeNetwork {
    /// Network driver for networks this document owns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Marks a network owned outside this document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
}

impl ComposeNetwork {
    /// Bridge network owned by this environment.
    pub fn bridge() -> Self {
        Self {
            driver: Some("bridge".to_string()),
            external: None,
        }
    }

    /// Reference to a network created outside the compose project.
    pub fn external() -> Self {
        Self {
            driver: None,
            external: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_service_omits_unset_fields() {
        let mut doc = ComposeDocument::default();
        doc.services.insert(
            "app".to_string(),
            ComposeService {
                image: "nginx:alpine".to_string(),
                ..Default::default()
            },
        );
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("image: nginx:alpine"));
        assert!(!yaml.contains("container_name"));
        assert!(!yaml.contains("healthcheck"));
        assert!(!yaml.contains("networks"));
    }

    #[test]
    fn full_service_round_trips_keys() {
        let mut doc = ComposeDocument::default();
        doc.services.insert(
            "app".to_string(),
            ComposeService {
                image: "eclipse-temurin:17".to_string(),
                container_name: Some("env-abc123".to_string()),
                command: Some("sh -c \"java -jar app.jar\"".to_string()),
                ports: vec!["18005:8080".to_string()],
                volumes: vec!["/opt/apps/exp1:/app/program".to_string()],
                networks: vec!["env-abc123-net".to_string()],
                restart: Some("unless-stopped".to_string()),
                healthcheck: Some(ComposeHealthcheck {
                    test: vec![
                        "CMD".to_string(),
                        "curl".to_string(),
                        "-f".to_string(),
                        "http://localhost:8080/health".to_string(),
                    ],
                    interval: "30s".to_string(),
                    timeout: "10s".to_string(),
                    retries: 3,
                    start_period: "40s".to_string(),
                }),
                ..Default::default()
            },
        );
        doc.networks
            .insert("env-abc123-net".to_string(), ComposeNetwork::bridge());
        doc.networks
            .insert("shared-mysql-net".to_string(), ComposeNetwork::external());

        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("container_name: env-abc123"));
        assert!(yaml.contains("- 18005:8080"));
        assert!(yaml.contains("start_period: 40s"));
        assert!(yaml.contains("driver: bridge"));
        assert!(yaml.contains("external: true"));
    }
}
