// ABOUTME: Durable notification row store on PostgreSQL shared by the Redis and LISTEN/NOTIFY backends
// ABOUTME: Group-key replacement runs as one transaction under a per-key advisory lock
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Relational storage for durable notifications
//!
//! Rows mirror the `Notification` fields plus `notified_at`, the moment the row
//! was written, which the cleanup scheduler compares against mode TTLs.

use chrono::{DateTime, Utc};
use pulse_core::errors::{AppError, AppResult};
use pulse_core::models::{DeliveryMode, Notification, ScopeKey};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts for a write transaction hitting serialization failures or deadlocks
const MAX_TRANSACTION_ATTEMPTS: u32 = 3;

const SELECT_COLUMNS: &str =
    "id, kind, scope, scope_id, group_key, mode, payload, created_at";

/// `PostgreSQL` row store for queued and timeseries notifications
#[derive(Clone)]
pub struct SqlStore {
    pool: PgPool,
}

impl SqlStore {
    /// Connect a pool and ensure the schema exists
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or migration fails
    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the notifications table and indexes
    ///
    /// DDL runs in one transaction holding an advisory lock so concurrent
    /// processes starting together do not race on `CREATE ... IF NOT EXISTS`.
    async fn migrate(&self) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('pulse_notifications_migrate'))")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS pulse_notifications (
                id UUID PRIMARY KEY,
                kind TEXT NOT NULL,
                scope TEXT NOT NULL CHECK (scope IN ('session', 'user')),
                scope_id TEXT NOT NULL,
                group_key TEXT,
                mode TEXT NOT NULL CHECK (mode IN ('queued', 'timeseries')),
                payload JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL,
                notified_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pulse_notifications_scope \
             ON pulse_notifications (scope, scope_id, mode, created_at)",
        )
        .execute(&mut *tx)
        .await?;

        // At most one holder per group key, whatever its mode
        sqlx::query("DROP INDEX IF EXISTS idx_pulse_notifications_group")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_pulse_notifications_group_key \
             ON pulse_notifications (scope, scope_id, group_key) \
             WHERE group_key IS NOT NULL",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pulse_notifications_expiry \
             ON pulse_notifications (mode, notified_at)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Notification schema ready");
        Ok(())
    }

    /// Insert a notification, replacing the holder of its group key
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails after retries
    pub async fn store(&self, notification: &Notification) -> AppResult<Option<Uuid>> {
        let Some(target) = notification.target.as_ref() else {
            return Ok(None);
        };
        if !notification.mode.is_persisted() {
            return Ok(None);
        }

        retry_transaction(|| self.store_once(target, notification)).await
    }

    async fn store_once(
        &self,
        target: &ScopeKey,
        notification: &Notification,
    ) -> AppResult<Option<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let replaced = match &notification.group {
            Some(group) => {
                lock_group(&mut tx, target, group).await?;
                delete_group_holder(&mut tx, target, group, None).await?
            }
            None => None,
        };

        sqlx::query(
            r"
            INSERT INTO pulse_notifications
                (id, kind, scope, scope_id, group_key, mode, payload, created_at, notified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, CURRENT_TIMESTAMP)
            ",
        )
        .bind(notification.id)
        .bind(&notification.kind)
        .bind(target.scope.as_str())
        .bind(&target.scope_id)
        .bind(notification.group.as_deref())
        .bind(notification.mode.as_str())
        .bind(Json(&notification.payload))
        .bind(notification.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some(old) = replaced {
            debug!(old_id = %old, new_id = %notification.id, scope = %target, "Replaced group holder");
        }
        Ok(replaced)
    }

    /// Delete a row by id, returning the scope it was addressed to
    ///
    /// # Errors
    ///
    /// Returns an error if the delete or row decoding fails
    pub async fn remove(&self, id: Uuid) -> AppResult<Option<ScopeKey>> {
        let row = sqlx::query(
            "DELETE FROM pulse_notifications WHERE id = $1 RETURNING scope, scope_id",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_scope).transpose()
    }

    /// Delete the queued holder of a group key under the same lock `store` takes
    ///
    /// Timeseries holders are never dismissed by group.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails after retries
    pub async fn remove_by_group(&self, target: &ScopeKey, group: &str) -> AppResult<Option<Uuid>> {
        retry_transaction(|| async move {
            let mut tx = self.pool.begin().await?;
            lock_group(&mut tx, target, group).await?;
            let removed =
                delete_group_holder(&mut tx, target, group, Some(DeliveryMode::Queued)).await?;
            tx.commit().await?;
            Ok(removed)
        })
        .await
    }

    /// Fetch a row by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query or row decoding fails
    pub async fn get(&self, id: Uuid) -> AppResult<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM pulse_notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_notification).transpose()
    }

    /// Mode of a row by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored mode is unknown
    pub async fn get_mode(&self, id: Uuid) -> AppResult<Option<DeliveryMode>> {
        let mode: Option<String> =
            sqlx::query_scalar("SELECT mode FROM pulse_notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        mode.map(|m| m.parse().map_err(AppError::database)).transpose()
    }

    /// Queued rows for a scope, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query or row decoding fails
    pub async fn get_queued(&self, target: &ScopeKey) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM pulse_notifications \
             WHERE scope = $1 AND scope_id = $2 AND mode = 'queued' \
             ORDER BY created_at ASC, notified_at ASC"
        ))
        .bind(target.scope.as_str())
        .bind(&target.scope_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }

    /// Timeseries rows for a scope created strictly after `since`, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query or row decoding fails
    pub async fn get_since(
        &self,
        target: &ScopeKey,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM pulse_notifications \
             WHERE scope = $1 AND scope_id = $2 AND mode = 'timeseries' AND created_at > $3 \
             ORDER BY created_at ASC, notified_at ASC"
        ))
        .bind(target.scope.as_str())
        .bind(&target.scope_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }

    /// Delete rows older than their mode's cutoff
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub async fn purge_expired(
        &self,
        queued_before: DateTime<Utc>,
        timeseries_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM pulse_notifications
            WHERE (mode = 'queued' AND notified_at < $1)
               OR (mode = 'timeseries' AND notified_at < $2)
            ",
        )
        .bind(queued_before)
        .bind(timeseries_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// `SELECT 1` round trip
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Serialize writers of one `(scope, scope_id, group)` key for the rest of the transaction
async fn lock_group(
    tx: &mut Transaction<'_, Postgres>,
    target: &ScopeKey,
    group: &str,
) -> AppResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("{target}:{group}"))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Delete the holder of a group key, restricted to `mode` when given
async fn delete_group_holder(
    tx: &mut Transaction<'_, Postgres>,
    target: &ScopeKey,
    group: &str,
    mode: Option<DeliveryMode>,
) -> AppResult<Option<Uuid>> {
    let removed = sqlx::query_scalar::<_, Uuid>(
        "DELETE FROM pulse_notifications \
         WHERE scope = $1 AND scope_id = $2 AND group_key = $3 \
           AND ($4::TEXT IS NULL OR mode = $4) \
         RETURNING id",
    )
    .bind(target.scope.as_str())
    .bind(&target.scope_id)
    .bind(group)
    .bind(mode.map(DeliveryMode::as_str))
    .fetch_optional(&mut **tx)
    .await?;
    Ok(removed)
}

fn row_to_scope(row: &PgRow) -> AppResult<ScopeKey> {
    let scope: String = row.try_get("scope")?;
    Ok(ScopeKey {
        scope: scope.parse().map_err(AppError::database)?,
        scope_id: row.try_get("scope_id")?,
    })
}

fn row_to_notification(row: &PgRow) -> AppResult<Notification> {
    let mode: String = row.try_get("mode")?;
    let payload: Json<Map<String, Value>> = row.try_get("payload")?;

    Ok(Notification {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        target: Some(row_to_scope(row)?),
        group: row.try_get("group_key")?,
        mode: mode.parse().map_err(AppError::database)?,
        payload: payload.0,
        created_at: row.try_get("created_at")?,
    })
}

/// Retry a write transaction on serialization failure (40001) or deadlock (40P01)
async fn retry_transaction<F, Fut, T>(mut f: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS && is_retryable(&e) => {
                let backoff_ms = 10 * (1_u64 << attempt);
                warn!(
                    attempt,
                    backoff_ms,
                    error = %e,
                    "Notification write failed with retryable error, retrying after backoff"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retryable(error: &AppError) -> bool {
    error
        .source
        .as_deref()
        .and_then(|source| source.downcast_ref::<sqlx::Error>())
        .and_then(|e| match e {
            sqlx::Error::Database(db) => db.code(),
            _ => None,
        })
        .is_some_and(|code| code == "40001" || code == "40P01")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_gives_up_on_non_retryable_error() {
        let mut calls = 0;
        let result: AppResult<()> = retry_transaction(|| {
            calls += 1;
            async { Err(AppError::database("constraint violated")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
