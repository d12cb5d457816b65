// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database providers.
//!
//! A [`DatabaseProvider`] prepares the backing database an experiment asks
//! for and contributes the compose fragments (networks, service blocks,
//! connection variables) the generated document needs. Two modes ship:
//!
//! - `shared:mysql` joins the environment to one long-lived MySQL container
//!   managed outside any single environment, with one schema per experiment.
//! - `standalone:mysql` adds a private `db` service to the environment's own
//!   compose project.
//!
//! Providers also gate orchestration behavior: whether to wait on the app
//! health probe after start and whether to re-verify the container exists.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::document::{ComposeHealthcheck, ComposeNetwork, ComposeService};
use crate::error::ProviderError;
use crate::manifest::DatabaseSettings;

/// Service name of the private database in standalone mode.
pub const STANDALONE_SERVICE: &str = "db";

/// Handle to the long-lived shared database container, implemented by the
/// orchestrator crate. Wired into the shared provider at registry build time.
#[async_trait]
pub trait SharedDatabase: Send + Sync {
    /// Verifies the shared container is present, running, and answering,
    /// creating or restarting it where configuration allows.
    async fn ensure_available(&self) -> Result<(), ProviderError>;

    /// Creates the named schema if it does not exist yet.
    async fn ensure_database(&self, name: &str) -> Result<(), ProviderError>;

    /// Name of the external network the shared container lives on.
    fn network_name(&self) -> &str;

    /// Hostname applications use to reach the shared container.
    fn host_name(&self) -> &str;
}

/// Placement details handed to [`DatabaseProvider::service_block`].
#[derive(Debug, Clone)]
pub struct ServiceContext {
    /// Primary container name of the environment.
    pub container_name: String,
    /// Per-environment network name.
    pub network_name: String,
    /// Environment work directory, for data-directory mounts.
    pub work_dir: PathBuf,
}

/// Pluggable backing-database policy, selected by `provider:type` key.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Provider half of the registry key, e.g. `shared`.
    fn provider_type(&self) -> &'static str;

    /// Engine half of the registry key, e.g. `mysql`.
    fn database_type(&self) -> &'static str;

    /// Makes the backing database reachable before the environment starts.
    async fn ensure_ready(&self, settings: &DatabaseSettings) -> Result<(), ProviderError>;

    /// Whether the orchestrator should wait on the application health probe
    /// after starting the environment.
    fn wait_for_app_health(&self) -> bool {
        true
    }

    /// Whether the orchestrator should re-verify the container exists after
    /// a successful start.
    fn verify_container_exists(&self) -> bool {
        true
    }

    /// Extra network the primary service must join, if any.
    fn network_attachment(&self) -> Option<String> {
        None
    }

    /// Network definition to add to the document, if any.
    fn network_definition(&self) -> Option<(String, ComposeNetwork)> {
        None
    }

    /// Private database service to add to the document, if any.
    fn service_block(
        &self,
        settings: &DatabaseSettings,
        ctx: &ServiceContext,
    ) -> Option<ComposeService> {
        let _ = (settings, ctx);
        None
    }

    /// Services the primary service must wait for.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Connection variables injected into the primary service environment.
    fn connection_env(&self, settings: &DatabaseSettings) -> BTreeMap<String, String>;
}

fn connection_vars(settings: &DatabaseSettings, host: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DB_HOST".to_string(), host.to_string()),
        ("DB_PORT".to_string(), "3306".to_string()),
        ("DB_NAME".to_string(), settings.name.clone()),
        ("DB_USER".to_string(), settings.username.clone()),
        ("DB_PASSWORD".to_string(), settings.password.clone()),
        (
            "DB_URL".to_string(),
            format!(
                "mysql://{}:{}@{}:3306/{}",
                settings.username, settings.password, host, settings.name
            ),
        ),
    ])
}

/// Shared MySQL: one container for all environments, one schema each.
pub struct MySqlSharedProvider {
    shared: Option<Arc<dyn SharedDatabase>>,
}

impl MySqlSharedProvider {
    /// A provider backed by the given shared-database manager. `None` leaves
    /// the provider registered but unable to provision, which surfaces as a
    /// configuration error at create time rather than at startup.
    pub fn new(shared: Option<Arc<dyn SharedDatabase>>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl DatabaseProvider for MySqlSharedProvider {
    fn provider_type(&self) -> &'static str {
        "shared"
    }

    fn database_type(&self) -> &'static str {
        "mysql"
    }

    async fn ensure_ready(&self, settings: &DatabaseSettings) -> Result<(), ProviderError> {
        let shared = self.shared.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured(
                "shared MySQL requested but no shared database manager is wired in".to_string(),
            )
        })?;
        shared.ensure_available().await?;
        if !settings.name.trim().is_empty() {
            shared.ensure_database(&settings.name).await?;
        }
        Ok(())
    }

    fn network_attachment(&self) -> Option<String> {
        self.shared.as_ref().map(|s| s.network_name().to_string())
    }

    fn network_definition(&self) -> Option<(String, ComposeNetwork)> {
        self.shared
            .as_ref()
            .map(|s| (s.network_name().to_string(), ComposeNetwork::external()))
    }

    fn connection_env(&self, settings: &DatabaseSettings) -> BTreeMap<String, String> {
        match &self.shared {
            Some(shared) => connection_vars(settings, shared.host_name()),
            None => BTreeMap::new(),
        }
    }
}

/// Standalone MySQL: a private `db` service inside the environment project.
pub struct MySqlStandaloneProvider;

#[async_trait]
impl DatabaseProvider for MySqlStandaloneProvider {
    fn provider_type(&self) -> &'static str {
        "standalone"
    }

    fn database_type(&self) -> &'static str {
        "mysql"
    }

    async fn ensure_ready(&self, _settings: &DatabaseSettings) -> Result<(), ProviderError> {
        // The engine creates the db service together with the project.
        tracing::debug!("standalone MySQL: provisioning deferred to the compose project");
        Ok(())
    }

    fn wait_for_app_health(&self) -> bool {
        // The app retries its database connection at startup; waiting on the
        // app probe here just rediscovers the db warm-up time.
        false
    }

    fn verify_container_exists(&self) -> bool {
        false
    }

    fn service_block(
        &self,
        settings: &DatabaseSettings,
        ctx: &ServiceContext,
    ) -> Option<ComposeService> {
        let data_dir = ctx.work_dir.join("mysql-data");
        Some(ComposeService {
            image: "mysql:8.0".to_string(),
            container_name: Some(format!("{}-db", ctx.container_name)),
            environment: BTreeMap::from([
                (
                    "MYSQL_ROOT_PASSWORD".to_string(),
                    settings.password.clone(),
                ),
                ("MYSQL_DATABASE".to_string(), settings.name.clone()),
            ]),
            volumes: vec![format!("{}:/var/lib/mysql", data_dir.display())],
            networks: vec![ctx.network_name.clone()],
            restart: Some("unless-stopped".to_string()),
            healthcheck: Some(ComposeHealthcheck {
                test: vec![
                    "CMD".to_string(),
                    "mysqladmin".to_string(),
                    "ping".to_string(),
                    "-h".to_string(),
                    "localhost".to_string(),
                    "-u".to_string(),
                    "root".to_string(),
                    format!("-p{}", settings.password),
                ],
                interval: "5s".to_string(),
                timeout: "3s".to_string(),
                retries: 3,
                start_period: "15s".to_string(),
            }),
            ..ComposeService::default()
        })
    }

    fn depends_on(&self) -> Vec<String> {
        vec![STANDALONE_SERVICE.to_string()]
    }

    fn connection_env(&self, settings: &DatabaseSettings) -> BTreeMap<String, String> {
        connection_vars(settings, STANDALONE_SERVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeShared;

    #[async_trait]
    impl SharedDatabase for FakeShared {
        async fn ensure_available(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn ensure_database(&self, _name: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        fn network_name(&self) -> &str {
            "shared-mysql-net"
        }

        fn host_name(&self) -> &str {
            "shared-mysql"
        }
    }

    #[tokio::test]
    async fn shared_without_manager_refuses_to_provision() {
        let provider = MySqlSharedProvider::new(None);
        let err = provider
            .ensure_ready(&DatabaseSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(provider.connection_env(&DatabaseSettings::default()).is_empty());
    }

    #[tokio::test]
    async fn shared_provider_exposes_external_network() {
        let provider = MySqlSharedProvider::new(Some(Arc::new(FakeShared)));
        assert_eq!(
            provider.network_attachment().as_deref(),
            Some("shared-mysql-net")
        );
        let (name, net) = provider.network_definition().unwrap();
        assert_eq!(name, "shared-mysql-net");
        assert_eq!(net.external, Some(true));
        let env = provider.connection_env(&DatabaseSettings::default());
        assert_eq!(env.get("DB_HOST").map(String::as_str), Some("shared-mysql"));
        assert!(provider.wait_for_app_health());
    }

    #[test]
    fn standalone_emits_db_service_and_skips_gates() {
        let provider = MySqlStandaloneProvider;
        let ctx = ServiceContext {
            container_name: "env-abc".to_string(),
            network_name: "env-abc-net".to_string(),
            work_dir: PathBuf::from("/opt/user_envs/u1/default/exp1"),
        };
        let service = provider
            .service_block(&DatabaseSettings::default(), &ctx)
            .unwrap();
        assert_eq!(service.image, "mysql:8.0");
        assert_eq!(service.container_name.as_deref(), Some("env-abc-db"));
        assert!(service.volumes[0].ends_with("mysql-data:/var/lib/mysql"));
        assert!(!provider.wait_for_app_health());
        assert!(!provider.verify_container_exists());
        assert_eq!(provider.depends_on(), vec!["db".to_string()]);
        let env = provider.connection_env(&DatabaseSettings::default());
        assert_eq!(env.get("DB_HOST").map(String::as_str), Some("db"));
        assert_eq!(
            env.get("DB_URL").map(String::as_str),
            Some("mysql://root:123456@db:3306/test_db")
        );
    }
}
