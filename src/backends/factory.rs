// ABOUTME: Backend factory selecting the notification backend from configuration
// ABOUTME: Enum dispatch over the in-memory, Redis, and PostgreSQL implementations
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::memory::InMemoryBackend;
use super::postgres::PostgresBackend;
use super::redis::RedisBackend;
use super::sql::SqlStore;
use super::{NotificationBackend, RemoteMessage};
use crate::config::{BackendKind, ServerConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::errors::{AppError, AppResult};
use pulse_core::models::{DeliveryMode, Notification, ScopeKey};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Backend instance wrapper that delegates to the configured implementation
#[derive(Clone)]
pub enum Backend {
    /// Process-local maps
    Memory(InMemoryBackend),
    /// Rows plus Redis pub/sub
    Redis(RedisBackend),
    /// Rows plus LISTEN/NOTIFY
    Postgres(PostgresBackend),
}

impl Backend {
    /// Create the backend named by `config.notifications.backend`
    ///
    /// # Errors
    ///
    /// Returns an error if a durable backend is selected without a database URL,
    /// or if the database or broker cannot be reached
    pub async fn from_config(config: &ServerConfig) -> AppResult<Self> {
        let kind = config.notifications.backend;
        info!("Initializing {} notification backend", kind);

        match kind {
            BackendKind::Memory => Ok(Self::Memory(InMemoryBackend::new())),
            BackendKind::Redis => {
                let store = Self::connect_store(config).await?;
                let backend = RedisBackend::new(store, &config.notifications).await?;
                Ok(Self::Redis(backend))
            }
            BackendKind::Postgres => {
                let store = Self::connect_store(config).await?;
                Ok(Self::Postgres(PostgresBackend::new(
                    store,
                    &config.notifications,
                )))
            }
        }
    }

    async fn connect_store(config: &ServerConfig) -> AppResult<SqlStore> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            AppError::config(format!(
                "DATABASE_URL is required for the {} notification backend",
                config.notifications.backend
            ))
        })?;
        SqlStore::connect(url, config.database_max_connections).await
    }

    /// Descriptive string for logs and health output
    #[must_use]
    pub const fn backend_info(&self) -> &'static str {
        match self {
            Self::Memory(_) => "In-memory (single instance)",
            Self::Redis(_) => "PostgreSQL rows + Redis pub/sub",
            Self::Postgres(_) => "PostgreSQL rows + LISTEN/NOTIFY",
        }
    }
}

impl From<InMemoryBackend> for Backend {
    fn from(backend: InMemoryBackend) -> Self {
        Self::Memory(backend)
    }
}

impl From<RedisBackend> for Backend {
    fn from(backend: RedisBackend) -> Self {
        Self::Redis(backend)
    }
}

impl From<PostgresBackend> for Backend {
    fn from(backend: PostgresBackend) -> Self {
        Self::Postgres(backend)
    }
}

/// Forward a trait call to whichever variant is active
macro_rules! delegate {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Self::Memory($backend) => $call,
            Self::Redis($backend) => $call,
            Self::Postgres($backend) => $call,
        }
    };
}

#[async_trait]
impl NotificationBackend for Backend {
    async fn start(&self) -> AppResult<()> {
        delegate!(self, b => b.start().await)
    }

    async fn stop(&self) -> AppResult<()> {
        delegate!(self, b => b.stop().await)
    }

    async fn store(&self, notification: &Notification) -> AppResult<Option<Uuid>> {
        delegate!(self, b => b.store(notification).await)
    }

    async fn remove(&self, id: Uuid) -> AppResult<Option<ScopeKey>> {
        delegate!(self, b => b.remove(id).await)
    }

    async fn remove_by_group(&self, target: &ScopeKey, group: &str) -> AppResult<Option<Uuid>> {
        delegate!(self, b => b.remove_by_group(target, group).await)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Notification>> {
        delegate!(self, b => b.get(id).await)
    }

    async fn get_mode(&self, id: Uuid) -> AppResult<Option<DeliveryMode>> {
        delegate!(self, b => b.get_mode(id).await)
    }

    async fn get_queued(&self, target: &ScopeKey) -> AppResult<Vec<Notification>> {
        delegate!(self, b => b.get_queued(target).await)
    }

    async fn get_since(
        &self,
        target: &ScopeKey,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        delegate!(self, b => b.get_since(target, since).await)
    }

    async fn publish(&self, message: &RemoteMessage) -> AppResult<()> {
        delegate!(self, b => b.publish(message).await)
    }

    fn subscribe_remote(&self) -> broadcast::Receiver<RemoteMessage> {
        delegate!(self, b => b.subscribe_remote())
    }

    async fn purge_expired(
        &self,
        queued_before: DateTime<Utc>,
        timeseries_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        delegate!(self, b => b.purge_expired(queued_before, timeseries_before).await)
    }

    async fn health_check(&self) -> AppResult<()> {
        delegate!(self, b => b.health_check().await)
    }

    fn kind(&self) -> BackendKind {
        delegate!(self, b => b.kind())
    }
}
