// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for labrig-compose.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by database providers while preparing backing services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The provider needs a shared database manager that was never wired in.
    #[error("shared database manager not configured: {0}")]
    NotConfigured(String),

    /// The shared database container is missing, stopped, or unresponsive.
    #[error("shared database unavailable: {0}")]
    SharedUnavailable(String),

    /// Creating or verifying the per-environment schema failed.
    #[error("database provisioning failed: {0}")]
    ProvisionFailed(String),
}

/// Errors raised while materializing an environment directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// The experiment program directory does not exist under the apps base.
    #[error("experiment program not found at {}", .0.display())]
    ProgramMissing(PathBuf),

    /// The experiment manifest exists but cannot be parsed.
    #[error("invalid experiment manifest at {path}: {message}")]
    InvalidManifest {
        /// Path of the manifest that failed to parse.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// Serializing the compose document failed.
    #[error("compose document serialization failed: {0}")]
    Render(#[from] serde_yaml::Error),

    /// A backing-database provider refused or failed readiness.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Filesystem operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using [`CompileError`].
pub type Result<T> = std::result::Result<T, CompileError>;
