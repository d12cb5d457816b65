// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed environment store.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{EnvironmentRecord, EnvironmentStore, LeaseStatus};
use crate::error::Error;

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PgEnvironmentStore {
    pool: PgPool,
}

impl PgEnvironmentStore {
    /// Create a new Postgres-backed store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnvironmentStore for PgEnvironmentStore {
    async fn find_active(
        &self,
        owner: &str,
        group: &str,
        experiment: &str,
    ) -> Result<Option<EnvironmentRecord>, Error> {
        let record = sqlx::query_as::<_, EnvironmentRecord>(
            r#"
            SELECT env_id, owner, env_group, experiment, port, container_ref,
                   work_dir, status, url, created_at, updated_at
            FROM environments
            WHERE owner = $1 AND env_group = $2 AND experiment = $3
              AND status != 'DESTROYED'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(group)
        .bind(experiment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get(&self, env_id: &str) -> Result<Option<EnvironmentRecord>, Error> {
        let record = sqlx::query_as::<_, EnvironmentRecord>(
            r#"
            SELECT env_id, owner, env_group, experiment, port, container_ref,
                   work_dir, status, url, created_at, updated_at
            FROM environments
            WHERE env_id = $1
            "#,
        )
        .bind(env_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert(&self, record: &EnvironmentRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO environments (env_id, owner, env_group, experiment, port,
                                      container_ref, work_dir, status, url,
                                      created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.env_id)
        .bind(&record.owner)
        .bind(&record.env_group)
        .bind(&record.experiment)
        .bind(record.port)
        .bind(&record.container_ref)
        .bind(&record.work_dir)
        .bind(&record.status)
        .bind(&record.url)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, record: &EnvironmentRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE environments
            SET port = $2, container_ref = $3, work_dir = $4, status = $5,
                url = $6, updated_at = NOW()
            WHERE env_id = $1
            "#,
        )
        .bind(&record.env_id)
        .bind(record.port)
        .bind(&record.container_ref)
        .bind(&record.work_dir)
        .bind(&record.status)
        .bind(&record.url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<EnvironmentRecord>, Error> {
        let records = sqlx::query_as::<_, EnvironmentRecord>(
            r#"
            SELECT env_id, owner, env_group, experiment, port, container_ref,
                   work_dir, status, url, created_at, updated_at
            FROM environments
            WHERE owner = $1 AND status != 'DESTROYED'
            ORDER BY created_at
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<EnvironmentRecord>, Error> {
        let records = sqlx::query_as::<_, EnvironmentRecord>(
            r#"
            SELECT env_id, owner, env_group, experiment, port, container_ref,
                   work_dir, status, url, created_at, updated_at
            FROM environments
            WHERE status != 'DESTROYED'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn lease_status(&self, port: u16) -> Result<Option<LeaseStatus>, Error> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM port_leases WHERE port = $1")
                .bind(port as i32)
                .fetch_optional(&self.pool)
                .await?;

        Ok(status.map(|s| {
            if s == LeaseStatus::Used.as_str() {
                LeaseStatus::Used
            } else {
                LeaseStatus::Free
            }
        }))
    }

    async fn claim_free_lease(&self, port: u16, holder: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE port_leases
            SET holder = $2, status = 'USED', allocated_at = NOW()
            WHERE port = $1 AND status = 'FREE'
            "#,
        )
        .bind(port as i32)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_lease_used(&self, port: u16, holder: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO port_leases (port, holder, status, allocated_at)
            VALUES ($1, $2, 'USED', NOW())
            "#,
        )
        .bind(port as i32)
        .bind(holder)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn release_lease(&self, port: u16) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE port_leases
            SET holder = NULL, status = 'FREE'
            WHERE port = $1
            "#,
        )
        .bind(port as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
