// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider registry.
//!
//! Maps type keys to runtime strategies and `provider:type` keys to database
//! providers. Unknown keys never fail a request: lookups fall back to the
//! baseline strategy (`java`) or provider (`shared:mysql`) and log the
//! substitution, so a typo in a manifest degrades instead of erroring.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::database::{
    DatabaseProvider, MySqlSharedProvider, MySqlStandaloneProvider, SharedDatabase,
};
use crate::manifest::DatabaseSettings;
use crate::runtime::{JavaRuntime, NginxRuntime, NodeRuntime, PythonRuntime, RuntimeStrategy};

/// Runtime type key used when a manifest names an unknown one.
pub const DEFAULT_RUNTIME: &str = "java";

/// Database registry key used when a manifest names an unknown one.
pub const DEFAULT_DATABASE: &str = "shared:mysql";

/// Lookup table for runtime strategies and database providers.
pub struct ProviderRegistry {
    runtimes: HashMap<String, Arc<dyn RuntimeStrategy>>,
    databases: HashMap<String, Arc<dyn DatabaseProvider>>,
    fallback_runtime: Arc<dyn RuntimeStrategy>,
    fallback_database: Arc<dyn DatabaseProvider>,
}

impl ProviderRegistry {
    /// Registry with the builtin strategies and providers. `shared` backs the
    /// `shared:mysql` provider; pass `None` when no shared database manager
    /// exists (shared requests then fail at provisioning time).
    pub fn with_builtins(shared: Option<Arc<dyn SharedDatabase>>) -> Self {
        let java: Arc<dyn RuntimeStrategy> = Arc::new(JavaRuntime);
        let nginx: Arc<dyn RuntimeStrategy> = Arc::new(NginxRuntime);
        let shared_mysql: Arc<dyn DatabaseProvider> = Arc::new(MySqlSharedProvider::new(shared));

        let mut registry = Self {
            runtimes: HashMap::new(),
            databases: HashMap::new(),
            fallback_runtime: java.clone(),
            fallback_database: shared_mysql.clone(),
        };
        registry.register_runtime(java);
        registry.register_runtime(Arc::new(PythonRuntime));
        registry.register_runtime(Arc::new(NodeRuntime));
        registry.register_runtime(nginx.clone());
        // Legacy manifests say `docker` for static image serving.
        registry.runtimes.insert("docker".to_string(), nginx);
        registry.register_database(shared_mysql);
        registry.register_database(Arc::new(MySqlStandaloneProvider));
        registry
    }

    /// Registers a strategy under its own type key, replacing any previous
    /// registration.
    pub fn register_runtime(&mut self, strategy: Arc<dyn RuntimeStrategy>) {
        self.runtimes
            .insert(strategy.type_key().to_string(), strategy);
    }

    /// Registers a provider under its own `provider:type` key, replacing any
    /// previous registration.
    pub fn register_database(&mut self, provider: Arc<dyn DatabaseProvider>) {
        let key = format!("{}:{}", provider.provider_type(), provider.database_type());
        self.databases.insert(key, provider);
    }

    /// Resolves a runtime strategy. `None` means the manifest declared no
    /// runtime and the default applies quietly; an unknown key warns and
    /// falls back.
    pub fn runtime(&self, type_key: Option<&str>) -> Arc<dyn RuntimeStrategy> {
        let Some(requested) = type_key else {
            debug!(default = DEFAULT_RUNTIME, "no runtime declared, using default");
            return self.fallback_runtime.clone();
        };
        match self.runtimes.get(&requested.to_lowercase()) {
            Some(strategy) => strategy.clone(),
            None => {
                warn!(
                    requested,
                    fallback = DEFAULT_RUNTIME,
                    "unknown runtime type, falling back"
                );
                self.fallback_runtime.clone()
            }
        }
    }

    /// Resolves a database provider by the settings' `provider:type` key,
    /// warning and falling back on an unknown key.
    pub fn database(&self, settings: &DatabaseSettings) -> Arc<dyn DatabaseProvider> {
        let key = settings.registry_key();
        match self.databases.get(&key.to_lowercase()) {
            Some(provider) => provider.clone(),
            None => {
                warn!(
                    requested = %key,
                    fallback = DEFAULT_DATABASE,
                    "unknown database provider, falling back"
                );
                self.fallback_database.clone()
            }
        }
    }
}
