// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compose-spec compiler.
//!
//! [`ComposeCompiler`] turns an experiment manifest plus an allocated port
//! into an environment directory on disk: `docker-compose.yml`, a companion
//! `.env`, and a `logs/` subdirectory. The directory layout is
//! `{user_envs_base}/{owner}/{group}/{experiment}`; the program sources are
//! bind-mounted from `{apps_base}/{experiment}` and never copied.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::document::{ComposeDocument, ComposeNetwork, ComposeService};
use crate::error::{CompileError, Result};
use crate::manifest::ExperimentManifest;
use crate::registry::ProviderRegistry;

/// Manifest file name inside an experiment package.
pub const MANIFEST_FILE: &str = "metadata.json";

/// Compose file name inside an environment directory.
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Companion variables file inside an environment directory.
pub const ENV_FILE: &str = ".env";

/// Image used for experiments that ship no manifest at all. Such packages
/// predate `metadata.json` and are runnable jars by convention.
const FALLBACK_IMAGE: &str = "java-base:latest";

/// Attempts made when removing a work directory.
const REMOVE_ATTEMPTS: u32 = 3;

/// Pause between removal attempts.
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Inputs for one materialization.
#[derive(Debug)]
pub struct MaterializeRequest<'a> {
    /// Environment owner (user id).
    pub owner: &'a str,
    /// Normalized group (system id).
    pub group: &'a str,
    /// Experiment id.
    pub experiment: &'a str,
    /// Generated environment id.
    pub env_id: &'a str,
    /// Allocated host port.
    pub port: u16,
    /// Manifest the caller already loaded.
    pub manifest: &'a ExperimentManifest,
}

/// What materialization produced.
#[derive(Debug, Clone)]
pub struct MaterializedSpec {
    /// Environment directory holding the compose file.
    pub work_dir: PathBuf,
    /// Primary container name.
    pub container_name: String,
    /// Per-environment network name.
    pub network_name: String,
}

/// Produces environment directories consumable by the container driver.
#[async_trait]
pub trait SpecCompiler: Send + Sync {
    /// Loads the experiment manifest. A missing manifest yields the default
    /// (empty) manifest; an unreadable one is an error.
    async fn load_manifest(&self, experiment: &str) -> Result<ExperimentManifest>;

    /// Lays out the environment directory and writes the compose spec,
    /// running any backing-database readiness work the manifest asks for.
    async fn materialize(&self, req: MaterializeRequest<'_>) -> Result<MaterializedSpec>;

    /// Removes an environment directory, retrying transient failures.
    /// Removing an absent directory is a no-op.
    async fn remove_work_dir(&self, work_dir: &Path) -> Result<()>;
}

/// The default [`SpecCompiler`] backed by a [`ProviderRegistry`].
pub struct ComposeCompiler {
    apps_base: PathBuf,
    user_envs_base: PathBuf,
    registry: Arc<ProviderRegistry>,
}

impl ComposeCompiler {
    /// A compiler reading experiment packages under `apps_base` and writing
    /// environment directories under `user_envs_base`.
    pub fn new(
        apps_base: impl Into<PathBuf>,
        user_envs_base: impl Into<PathBuf>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            apps_base: apps_base.into(),
            user_envs_base: user_envs_base.into(),
            registry,
        }
    }

    fn build_document(
        &self,
        req: &MaterializeRequest<'_>,
        spec: &MaterializedSpec,
        program_path: &Path,
    ) -> ComposeDocument {
        let manifest = req.manifest;
        let strategy = self.registry.runtime(manifest.effective_runtime());
        let settings = manifest.effective_database();
        let provider = settings.as_ref().map(|s| self.registry.database(s));

        let container_port = manifest
            .effective_container_port()
            .unwrap_or_else(|| strategy.default_container_port());

        let vars = BTreeMap::from([
            ("APP_PORT".to_string(), req.port.to_string()),
            ("CONTAINER_PORT".to_string(), container_port.to_string()),
            ("OWNER_ID".to_string(), req.owner.to_string()),
            ("EXP_ID".to_string(), req.experiment.to_string()),
            ("ENV_ID".to_string(), req.env_id.to_string()),
        ]);
        let command = strategy.build_start_command(manifest.start_command.as_deref(), &vars);

        let ports = if manifest.host_ports.is_empty() {
            vec![format!("{}:{}", req.port, container_port)]
        } else {
            manifest.host_ports.clone()
        };

        let volumes = if manifest.volumes.is_empty() {
            strategy.default_volumes(program_path)
        } else {
            manifest.volumes.clone()
        };

        let mut environment = strategy.default_environment(req.port, container_port);
        environment.insert("OWNER_ID".to_string(), req.owner.to_string());
        environment.insert("EXP_ID".to_string(), req.experiment.to_string());
        environment.insert("ENV_ID".to_string(), req.env_id.to_string());
        environment.extend(manifest.env.clone());

        let mut networks = vec![spec.network_name.clone()];
        let mut depends_on = Vec::new();
        if let Some(provider) = &provider {
            if let Some(settings) = &settings {
                environment.extend(provider.connection_env(settings));
            }
            if let Some(extra) = provider.network_attachment() {
                networks.push(extra);
            }
            depends_on.extend(provider.depends_on());
        }

        let healthcheck = manifest
            .health_check
            .clone()
            .or_else(|| strategy.default_health_check(container_port))
            .filter(|probe| !probe.test.is_empty())
            .map(Into::into);

        let app = ComposeService {
            image: manifest.base_image.clone().unwrap_or_default(),
            container_name: Some(spec.container_name.clone()),
            command,
            working_dir: strategy.working_directory().map(str::to_string),
            tty: strategy.enable_tty().then_some(true),
            stdin_open: strategy.enable_stdin_open().then_some(true),
            ports,
            volumes: volumes.iter().map(|v| v.render()).collect(),
            environment,
            networks,
            depends_on,
            restart: Some("unless-stopped".to_string()),
            healthcheck,
        };

        let mut doc = ComposeDocument::default();
        doc.services.insert("app".to_string(), app);
        doc.networks
            .insert(spec.network_name.clone(), ComposeNetwork::bridge());

        if let (Some(settings), Some(provider)) = (&settings, &provider) {
            let ctx = crate::database::ServiceContext {
                container_name: spec.container_name.clone(),
                network_name: spec.network_name.clone(),
                work_dir: spec.work_dir.clone(),
            };
            if let Some(block) = provider.service_block(settings, &ctx) {
                doc.services
                    .insert(crate::database::STANDALONE_SERVICE.to_string(), block);
            }
            if let Some((name, net)) = provider.network_definition() {
                doc.networks.insert(name, net);
            }
        }

        for extra in &manifest.services {
            if extra.name.is_empty() {
                continue;
            }
            doc.services.insert(
                extra.name.clone(),
                ComposeService {
                    image: extra.image.clone(),
                    command: extra.command.clone(),
                    ports: extra.ports.clone(),
                    environment: extra.environment.clone(),
                    volumes: extra.volumes.clone(),
                    depends_on: extra.depends_on.clone(),
                    networks: if extra.networks.is_empty() {
                        vec![spec.network_name.clone()]
                    } else {
                        extra.networks.clone()
                    },
                    ..ComposeService::default()
                },
            );
        }

        doc
    }

    fn env_file_contents(
        &self,
        req: &MaterializeRequest<'_>,
        spec: &MaterializedSpec,
        program_path: &Path,
    ) -> String {
        let mut entries = vec![
            ("ENV_ID".to_string(), req.env_id.to_string()),
            ("CONTAINER_NAME".to_string(), spec.container_name.clone()),
            ("APP_PORT".to_string(), req.port.to_string()),
            ("OWNER_ID".to_string(), req.owner.to_string()),
            ("EXP_ID".to_string(), req.experiment.to_string()),
            ("NETWORK_NAME".to_string(), spec.network_name.clone()),
            (
                "PROGRAM_PATH".to_string(),
                program_path.display().to_string(),
            ),
            (
                "LOG_PATH".to_string(),
                spec.work_dir.join("logs").display().to_string(),
            ),
        ];
        if let Some(settings) = req.manifest.effective_database() {
            let provider = self.registry.database(&settings);
            entries.extend(provider.connection_env(&settings));
        }
        let mut out = String::new();
        for (key, value) in entries {
            if value.trim().is_empty() {
                continue;
            }
            out.push_str(&key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl SpecCompiler for ComposeCompiler {
    async fn load_manifest(&self, experiment: &str) -> Result<ExperimentManifest> {
        let path = self.apps_base.join(experiment).join(MANIFEST_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|err| CompileError::InvalidManifest {
                    path,
                    message: err.to_string(),
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(experiment, "no manifest, using defaults");
                Ok(ExperimentManifest {
                    base_image: Some(FALLBACK_IMAGE.to_string()),
                    ..ExperimentManifest::default()
                })
            }
            Err(err) => Err(CompileError::Io(err)),
        }
    }

    async fn materialize(&self, req: MaterializeRequest<'_>) -> Result<MaterializedSpec> {
        let program_path = self.apps_base.join(req.experiment);
        if !program_path.is_dir() {
            return Err(CompileError::ProgramMissing(program_path));
        }

        let work_dir = self
            .user_envs_base
            .join(req.owner)
            .join(req.group)
            .join(req.experiment);
        tokio::fs::create_dir_all(work_dir.join("logs")).await?;

        let spec = MaterializedSpec {
            work_dir: work_dir.clone(),
            container_name: req.env_id.to_string(),
            network_name: format!("{}-net", req.env_id),
        };

        if let Some(settings) = req.manifest.effective_database() {
            let provider = self.registry.database(&settings);
            provider.ensure_ready(&settings).await?;
        }

        let doc = self.build_document(&req, &spec, &program_path);
        let yaml = doc.to_yaml()?;
        tokio::fs::write(work_dir.join(COMPOSE_FILE), yaml).await?;
        tokio::fs::write(
            work_dir.join(ENV_FILE),
            self.env_file_contents(&req, &spec, &program_path),
        )
        .await?;

        info!(
            env_id = req.env_id,
            work_dir = %work_dir.display(),
            "materialized environment spec"
        );
        Ok(spec)
    }

    async fn remove_work_dir(&self, work_dir: &Path) -> Result<()> {
        for attempt in 1..=REMOVE_ATTEMPTS {
            match tokio::fs::remove_dir_all(work_dir).await {
                Ok(()) => {
                    info!(work_dir = %work_dir.display(), "removed environment directory");
                    return Ok(());
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(work_dir = %work_dir.display(), "directory already absent");
                    return Ok(());
                }
                Err(err) if attempt < REMOVE_ATTEMPTS => {
                    warn!(
                        work_dir = %work_dir.display(),
                        attempt,
                        error = %err,
                        "directory removal failed, retrying"
                    );
                    tokio::time::sleep(REMOVE_RETRY_DELAY).await;
                }
                Err(err) => return Err(CompileError::Io(err)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DatabaseSettings;
    use tempfile::TempDir;

    fn compiler(root: &TempDir) -> ComposeCompiler {
        ComposeCompiler::new(
            root.path().join("apps"),
            root.path().join("user_envs"),
            Arc::new(ProviderRegistry::with_builtins(None)),
        )
    }

    fn write_experiment(root: &TempDir, experiment: &str, manifest: Option<&str>) {
        let dir = root.path().join("apps").join(experiment);
        std::fs::create_dir_all(&dir).unwrap();
        if let Some(raw) = manifest {
            std::fs::write(dir.join(MANIFEST_FILE), raw).unwrap();
        }
    }

    #[tokio::test]
    async fn materialize_writes_compose_and_env_files() {
        let root = TempDir::new().unwrap();
        write_experiment(
            &root,
            "exp1",
            Some(r#"{"baseImage": "eclipse-temurin:17", "runtimeType": "java"}"#),
        );
        let compiler = compiler(&root);
        let manifest = compiler.load_manifest("exp1").await.unwrap();
        let spec = compiler
            .materialize(MaterializeRequest {
                owner: "u1",
                group: "default",
                experiment: "exp1",
                env_id: "env-4f3a2b1c9d0e",
                port: 18005,
                manifest: &manifest,
            })
            .await
            .unwrap();

        assert_eq!(spec.container_name, "env-4f3a2b1c9d0e");
        assert_eq!(spec.network_name, "env-4f3a2b1c9d0e-net");
        assert!(spec.work_dir.ends_with("user_envs/u1/default/exp1"));
        assert!(spec.work_dir.join("logs").is_dir());

        let yaml = std::fs::read_to_string(spec.work_dir.join(COMPOSE_FILE)).unwrap();
        assert!(yaml.contains("image: eclipse-temurin:17"));
        assert!(yaml.contains("container_name: env-4f3a2b1c9d0e"));
        assert!(yaml.contains("- 18005:8080"));
        assert!(yaml.contains("http://localhost:8080/health"));

        let env = std::fs::read_to_string(spec.work_dir.join(ENV_FILE)).unwrap();
        assert!(env.contains("ENV_ID=env-4f3a2b1c9d0e\n"));
        assert!(env.contains("CONTAINER_NAME=env-4f3a2b1c9d0e\n"));
        assert!(env.contains("APP_PORT=18005\n"));
    }

    #[tokio::test]
    async fn missing_program_directory_is_an_error() {
        let root = TempDir::new().unwrap();
        let compiler = compiler(&root);
        let manifest = ExperimentManifest::default();
        let err = compiler
            .materialize(MaterializeRequest {
                owner: "u1",
                group: "default",
                experiment: "ghost",
                env_id: "env-000000000000",
                port: 18000,
                manifest: &manifest,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::ProgramMissing(_)));
    }

    #[tokio::test]
    async fn missing_manifest_defaults_and_corrupt_manifest_errors() {
        let root = TempDir::new().unwrap();
        write_experiment(&root, "plain", None);
        write_experiment(&root, "broken", Some("{not json"));
        let compiler = compiler(&root);

        let manifest = compiler.load_manifest("plain").await.unwrap();
        assert_eq!(manifest.effective_runtime(), None);
        // Pre-manifest packages still get a runnable image.
        assert_eq!(manifest.base_image.as_deref(), Some("java-base:latest"));

        let err = compiler.load_manifest("broken").await.unwrap_err();
        assert!(matches!(err, CompileError::InvalidManifest { .. }));
    }

    #[tokio::test]
    async fn standalone_database_adds_service_and_dependency() {
        let root = TempDir::new().unwrap();
        write_experiment(
            &root,
            "dbexp",
            Some(
                r#"{"baseImage": "eclipse-temurin:17",
                    "database": {"enabled": true, "provider": "standalone", "name": "exp_db"}}"#,
            ),
        );
        let compiler = compiler(&root);
        let manifest = compiler.load_manifest("dbexp").await.unwrap();
        assert_eq!(
            manifest.effective_database().map(|d| d.registry_key()),
            Some("standalone:mysql".to_string())
        );
        let spec = compiler
            .materialize(MaterializeRequest {
                owner: "u2",
                group: "g1",
                experiment: "dbexp",
                env_id: "env-aaaabbbbcccc",
                port: 18010,
                manifest: &manifest,
            })
            .await
            .unwrap();

        let yaml = std::fs::read_to_string(spec.work_dir.join(COMPOSE_FILE)).unwrap();
        assert!(yaml.contains("mysql:8.0"));
        assert!(yaml.contains("env-aaaabbbbcccc-db"));
        assert!(yaml.contains("depends_on"));
        let env = std::fs::read_to_string(spec.work_dir.join(ENV_FILE)).unwrap();
        assert!(env.contains("DB_HOST=db\n"));
        assert!(env.contains("DB_NAME=exp_db\n"));
    }

    #[tokio::test]
    async fn python_workspace_keeps_tty_and_skips_probe() {
        let root = TempDir::new().unwrap();
        write_experiment(
            &root,
            "pyexp",
            Some(r#"{"baseImage": "python:3.12", "runtimeType": "python"}"#),
        );
        let compiler = compiler(&root);
        let manifest = compiler.load_manifest("pyexp").await.unwrap();
        let spec = compiler
            .materialize(MaterializeRequest {
                owner: "u3",
                group: "default",
                experiment: "pyexp",
                env_id: "env-121212121212",
                port: 18020,
                manifest: &manifest,
            })
            .await
            .unwrap();
        let yaml = std::fs::read_to_string(spec.work_dir.join(COMPOSE_FILE)).unwrap();
        assert!(yaml.contains("tty: true"));
        assert!(yaml.contains("stdin_open: true"));
        assert!(!yaml.contains("healthcheck"));
        assert!(yaml.contains("tail -f /dev/null"));
    }

    #[tokio::test]
    async fn remove_work_dir_is_idempotent() {
        let root = TempDir::new().unwrap();
        let compiler = compiler(&root);
        let dir = root.path().join("user_envs/u1/default/exp1");
        std::fs::create_dir_all(&dir).unwrap();
        compiler.remove_work_dir(&dir).await.unwrap();
        assert!(!dir.exists());
        compiler.remove_work_dir(&dir).await.unwrap();
    }

    #[test]
    fn shared_database_key_defaults() {
        let settings = DatabaseSettings::default();
        assert_eq!(settings.registry_key(), "shared:mysql");
    }
}
