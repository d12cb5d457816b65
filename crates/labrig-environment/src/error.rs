// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for labrig-environment.

use thiserror::Error;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment was not found.
    #[error("Environment not found: {0}")]
    EnvNotFound(String),

    /// Container failed to start, carrying a classified cause.
    #[error("Container start failed: {0}")]
    ContainerStartFailed(String),

    /// Container is gone; a reset (full recreate) is required.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Container failed to stop.
    #[error("Container stop failed: {0}")]
    ContainerStopFailed(String),

    /// Port range is exhausted.
    #[error("No available port in range {min}-{max}")]
    NoAvailablePort {
        /// Lower bound of the configured range.
        min: u16,
        /// Upper bound of the configured range.
        max: u16,
    },

    /// Port lease could not be returned to the free pool.
    #[error("Failed to release port {0}")]
    PortReleaseFailed(u16),

    /// Backing-database readiness check failed.
    #[error("Database provisioning failed: {0}")]
    DatabaseInitFailed(String),

    /// Spec compilation failed.
    #[error("Spec compile error: {0}")]
    Compile(labrig_compose::CompileError),
}

impl From<labrig_compose::CompileError> for Error {
    fn from(err: labrig_compose::CompileError) -> Self {
        match err {
            // Provider readiness failures have their own taxonomy entry.
            labrig_compose::CompileError::Provider(inner) => {
                Error::DatabaseInitFailed(inner.to_string())
            }
            other => Error::Compile(other),
        }
    }
}

impl Error {
    /// Stable machine-readable code for API surfaces and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::EnvNotFound(_) => "ENV_NOT_FOUND",
            Error::ContainerStartFailed(_) => "CONTAINER_START_FAILED",
            Error::ContainerNotFound(_) => "CONTAINER_NOT_FOUND",
            Error::ContainerStopFailed(_) => "CONTAINER_STOP_FAILED",
            Error::NoAvailablePort { .. } => "NO_AVAILABLE_PORT",
            Error::PortReleaseFailed(_) => "PORT_RELEASE_FAILED",
            Error::DatabaseInitFailed(_) => "DATABASE_INIT_FAILED",
            Error::Compile(_) => "SPEC_COMPILE_ERROR",
        }
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_failures_map_to_database_init() {
        let err: Error = labrig_compose::CompileError::Provider(
            labrig_compose::ProviderError::NotConfigured("no shared manager".to_string()),
        )
        .into();
        assert!(matches!(err, Error::DatabaseInitFailed(_)));
        assert_eq!(err.code(), "DATABASE_INIT_FAILED");
    }

    #[test]
    fn compile_failures_keep_their_own_code() {
        let err: Error =
            labrig_compose::CompileError::ProgramMissing(std::path::PathBuf::from("/opt/apps/x"))
                .into();
        assert!(matches!(err, Error::Compile(_)));
        assert_eq!(err.code(), "SPEC_COMPILE_ERROR");
    }

    #[test]
    fn port_exhaustion_names_the_range() {
        let err = Error::NoAvailablePort {
            min: 18000,
            max: 19999,
        };
        assert_eq!(err.to_string(), "No available port in range 18000-19999");
        assert_eq!(err.code(), "NO_AVAILABLE_PORT");
    }
}
