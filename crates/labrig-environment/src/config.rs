// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for labrig-environment.

use std::path::PathBuf;
use std::time::Duration;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL for the environment/lease store
    pub database_url: String,
    /// Inclusive lower bound of the host port range
    pub port_range_start: u16,
    /// Inclusive upper bound of the host port range
    pub port_range_end: u16,
    /// Host name used when building environment URLs
    pub server_host: String,
    /// Directory holding experiment packages (one subdirectory per experiment)
    pub apps_base: PathBuf,
    /// Directory under which environment work directories are created
    pub user_envs_base: PathBuf,
    /// Upper bound for the post-start health poll
    pub health_timeout: Duration,
    /// Root password for the shared MySQL container
    pub shared_db_password: String,
    /// Create the shared MySQL container on demand if it does not exist
    pub shared_db_auto_create: bool,
}

impl Config {
    /// Load configuration from environment variables, reading a `.env` file
    /// first when one is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("LABRIG_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("LABRIG_DATABASE_URL"))?;

        let port_range_start: u16 = std::env::var("LABRIG_PORT_RANGE_START")
            .unwrap_or_else(|_| "18000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("LABRIG_PORT_RANGE_START"))?;

        let port_range_end: u16 = std::env::var("LABRIG_PORT_RANGE_END")
            .unwrap_or_else(|_| "19999".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("LABRIG_PORT_RANGE_END"))?;

        if port_range_start > port_range_end {
            return Err(ConfigError::Invalid("LABRIG_PORT_RANGE_START"));
        }

        let server_host =
            std::env::var("LABRIG_SERVER_HOST").unwrap_or_else(|_| "localhost".to_string());

        let apps_base = PathBuf::from(
            std::env::var("LABRIG_APPS_BASE").unwrap_or_else(|_| "/opt/labrig/apps".to_string()),
        );

        let user_envs_base = PathBuf::from(
            std::env::var("LABRIG_USER_ENVS_BASE")
                .unwrap_or_else(|_| "/opt/labrig/user-envs".to_string()),
        );

        let health_timeout_secs: u64 = std::env::var("LABRIG_HEALTH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("LABRIG_HEALTH_TIMEOUT_SECS"))?;

        let shared_db_password =
            std::env::var("LABRIG_SHARED_DB_PASSWORD").unwrap_or_else(|_| "123456".to_string());

        let shared_db_auto_create = std::env::var("LABRIG_SHARED_DB_AUTO_CREATE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            database_url,
            port_range_start,
            port_range_end,
            server_host,
            apps_base,
            user_envs_base,
            health_timeout: Duration::from_secs(health_timeout_secs),
            shared_db_password,
            shared_db_auto_create,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable holds an unparseable or inconsistent value.
    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}
