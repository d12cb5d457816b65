// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Labrig Compose - Experiment Spec Compiler
//!
//! This crate turns experiment manifests into ready-to-run compose projects.
//! It owns the manifest model, the typed compose document, the runtime and
//! database provider registries, and the compiler that lays environment
//! directories out on disk. It never talks to a container engine itself;
//! that is the orchestrator's job in `labrig-environment`.
//!
//! # Pipeline
//!
//! ```text
//! metadata.json ──► ExperimentManifest ──► ProviderRegistry
//!                                              │ resolves
//!                        ┌─────────────────────┴──────────────────────┐
//!                        ▼                                            ▼
//!                 RuntimeStrategy                              DatabaseProvider
//!          (port/command/mount defaults)                (connection env, db service)
//!                        │                                            │
//!                        └─────────────────┬──────────────────────────┘
//!                                          ▼
//!                                  ComposeCompiler
//!                                          │ writes
//!                                          ▼
//!                   {user_envs_base}/{owner}/{group}/{experiment}/
//!                       ├── docker-compose.yml
//!                       ├── .env
//!                       └── logs/
//! ```
//!
//! # Runtime Strategies
//!
//! | Key | Container port | Start command | Notes |
//! |-----|----------------|---------------|-------|
//! | `java` | 8080 | `java -jar /app/program/app.jar` | default strategy |
//! | `python` | 8000 | `tail -f /dev/null` keep-alive | tty + stdin, no health probe |
//! | `node` | 3000 | `npm install && node server.js` | `NODE_ENV=production` |
//! | `nginx` | 80 | image default | read-only mount, `wget --spider` probe |
//! | `docker` | 80 | image default | alias of `nginx` for static content |
//!
//! Unknown keys fall back to `java` with a warning; a manifest that declares
//! nothing gets the default quietly.
//!
//! # Database Providers
//!
//! | Key | Shape | Connection host |
//! |-----|-------|-----------------|
//! | `shared:mysql` | one shared container, one schema per environment | `shared-mysql` |
//! | `standalone:mysql` | private `mysql:8.0` service inside the project | `db` |
//!
//! # Modules
//!
//! - [`manifest`]: experiment `metadata.json` model with legacy-field support
//! - [`document`]: typed compose document serialized with serde_yaml
//! - [`runtime`]: per-runtime container defaults and command substitution
//! - [`database`]: backing-database providers and the shared-database trait
//! - [`registry`]: runtime/provider lookup with fallback resolution
//! - [`compiler`]: materializes environment directories on disk
//! - [`error`]: compile and provider error types

#![deny(missing_docs)]

/// Compile and provider error types.
pub mod error;

/// Experiment manifest (`metadata.json`) model.
pub mod manifest;

/// Typed compose document emitted by the compiler.
pub mod document;

/// Runtime strategies: per-runtime container defaults.
pub mod runtime;

/// Backing-database providers.
pub mod database;

/// Runtime and database provider registry.
pub mod registry;

/// Spec compiler writing environment directories.
pub mod compiler;

pub use compiler::{
    ComposeCompiler, MaterializeRequest, MaterializedSpec, SpecCompiler, COMPOSE_FILE, ENV_FILE,
    MANIFEST_FILE,
};
pub use database::{DatabaseProvider, ServiceContext, SharedDatabase, STANDALONE_SERVICE};
pub use error::{CompileError, ProviderError, Result};
pub use manifest::{DatabaseSettings, ExperimentManifest, HealthProbe};
pub use registry::ProviderRegistry;
pub use runtime::RuntimeStrategy;
