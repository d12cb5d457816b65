// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Labrig Environment - Experiment Environment Orchestration
//!
//! This crate provides the control plane for per-user experiment
//! environments. It allocates host ports, materializes container specs via
//! labrig-compose, drives `docker compose` projects through their lifecycle,
//! and keeps the authoritative environment records in PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Embedding Application                       │
//! └──────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  labrig-environment (this crate)                 │
//! │   ┌──────────────┐  ┌───────────────┐  ┌─────────────────────┐   │
//! │   │     Port     │  │  Environment  │  │      Container      │   │
//! │   │   Allocator  │  │  Orchestrator │  │        Driver       │   │
//! │   └──────────────┘  └───────────────┘  └─────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//!           │                  │                      │
//!           │                  │ materialize          │ docker compose
//!           ▼                  ▼                      ▼
//! ┌──────────────┐  ┌────────────────────┐  ┌──────────────────────┐
//! │  PostgreSQL  │  │   labrig-compose   │  │   Container Engine   │
//! │ (environments│  │  (spec compiler,   │  │  (per-env projects,  │
//! │  port_leases)│  │   providers)       │  │    shared MySQL)     │
//! └──────────────┘  └────────────────────┘  └──────────────────────┘
//! ```
//!
//! # Operations
//!
//! All lifecycle operations live on
//! [`EnvironmentOrchestrator`](orchestrator::EnvironmentOrchestrator):
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `create_env` | Create the environment for an (owner, group, experiment) key, or return the existing one |
//! | `stop_env` | Stop containers, preserving containers and volumes |
//! | `start_env` | Restart the stopped containers in place |
//! | `reset_env` | Tear containers down and recreate them from the materialized spec |
//! | `destroy_env` | Release port, containers, volumes, and directory |
//! | `env_status` | Report current status, reconciling out-of-band drift |
//! | `list_by_owner`, `list_all` | Read-side listings of live environments |
//!
//! # Environment Status State Machine
//!
//! ```text
//!                   create_env
//!                       │
//!                       ▼
//!                 ┌──────────┐
//!        ┌───────►│ RUNNING  │────────┐
//!        │        └────┬─────┘        │
//!   start_env          │ stop_env     │ destroy_env
//!   create_env         ▼              │
//!        │        ┌──────────┐        │
//!        └────────┤ STOPPED  │        │
//!                 └────┬─────┘        │
//!                      │ destroy_env  │
//!                      ▼              │
//!                 ┌──────────┐        │
//!                 │DESTROYED │◄───────┘
//!                 └──────────┘
//! ```
//!
//! DESTROYED is terminal. A record that claims RUNNING while its container
//! was removed out-of-band is flipped to STOPPED on the next status query.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `LABRIG_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `LABRIG_PORT_RANGE_START` | No | `18000` | First allocatable host port |
//! | `LABRIG_PORT_RANGE_END` | No | `19999` | Last allocatable host port |
//! | `LABRIG_SERVER_HOST` | No | `localhost` | Hostname used in environment URLs |
//! | `LABRIG_APPS_BASE` | No | `/opt/labrig/apps` | Directory experiment packages are read from |
//! | `LABRIG_USER_ENVS_BASE` | No | `/opt/labrig/user-envs` | Directory environment directories are written under |
//! | `LABRIG_HEALTH_TIMEOUT_SECS` | No | `30` | Soft deadline for container health waits |
//! | `LABRIG_SHARED_DB_PASSWORD` | No | `123456` | Root password of the shared MySQL container |
//! | `LABRIG_SHARED_DB_AUTO_CREATE` | No | `false` | Create the shared MySQL container on first use |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`driver`]: Container engine backends (`docker compose` CLI and a mock)
//! - [`error`]: Error types for environment operations
//! - [`migrations`]: Database migrations
//! - [`orchestrator`]: Environment lifecycle orchestration
//! - [`port`]: Host port lease allocation
//! - [`runtime`]: Embeddable runtime wiring everything together
//! - [`shared_db`]: Shared MySQL container lifecycle
//! - [`store`]: Environment and port lease persistence

#![deny(missing_docs)]

/// Database migrations for labrig-environment.
///
/// ```ignore
/// use labrig_environment::migrations;
///
/// let pool = PgPool::connect(&database_url).await?;
/// migrations::run(&pool).await?;
/// ```
pub mod migrations;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for environment operations.
pub mod error;

/// Environment and port lease persistence.
pub mod store;

/// Host port lease allocation.
pub mod port;

/// Container engine backends.
pub mod driver;

/// Shared MySQL container lifecycle.
pub mod shared_db;

/// Environment lifecycle orchestration.
pub mod orchestrator;

/// Embeddable runtime for labrig-environment.
pub mod runtime;

pub use config::Config;
pub use error::Error;
