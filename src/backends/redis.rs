// ABOUTME: Durable notification backend with relational rows and Redis pub/sub fanout
// ABOUTME: Subscriber task reconnects with exponential backoff when the broker connection drops
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::sql::SqlStore;
use super::{ListenerTask, NotificationBackend, ReconnectBackoff, RemoteMessage};
use crate::config::{BackendKind, NotificationConfig, RedisConnectionConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use pulse_core::constants::notifications::{LISTEN_INITIAL_BACKOFF_MS, REMOTE_CHANNEL_CAPACITY};
use pulse_core::errors::{AppError, AppResult};
use pulse_core::models::{DeliveryMode, Notification, ScopeKey};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Rows in `PostgreSQL`, events over a Redis pub/sub channel
///
/// Uses a Redis `ConnectionManager` for publishing (automatic reconnection) and
/// a dedicated pub/sub connection owned by the listener task.
#[derive(Clone)]
pub struct RedisBackend {
    store: SqlStore,
    client: Client,
    manager: ConnectionManager,
    channel: String,
    listen_max_backoff: Duration,
    remote_tx: broadcast::Sender<RemoteMessage>,
    listener: Arc<ListenerTask>,
}

impl RedisBackend {
    /// Connect to Redis and wrap an existing row store
    ///
    /// # Errors
    ///
    /// Returns an error if no Redis URL is configured or Redis is unreachable
    pub async fn new(store: SqlStore, config: &NotificationConfig) -> AppResult<Self> {
        let redis_url = config.redis_url.as_ref().ok_or_else(|| {
            AppError::config("Redis URL is required for the redis notification backend")
        })?;

        let conn_config = &config.redis_connection;
        info!(
            "Connecting to Redis (timeout={}s, response_timeout={}s, retries={})",
            conn_config.connection_timeout_secs,
            conn_config.response_timeout_secs,
            conn_config.initial_connection_retries
        );

        let client = Client::open(redis_url.as_str())
            .map_err(|e| AppError::config(format!("Invalid Redis URL: {e}")))?;
        let manager = Self::connect_with_retry(&client, conn_config).await?;
        let (remote_tx, _) = broadcast::channel(REMOTE_CHANNEL_CAPACITY);

        info!(channel = %config.redis_channel(), "Connected to Redis for notification fanout");

        Ok(Self {
            store,
            client,
            manager,
            channel: config.redis_channel(),
            listen_max_backoff: Duration::from_millis(config.listen_max_backoff_ms),
            remote_tx,
            listener: Arc::new(ListenerTask::new()),
        })
    }

    /// Connect with exponential backoff, configuring the manager's own reconnection policy
    async fn connect_with_retry(
        client: &Client,
        conn_config: &RedisConnectionConfig,
    ) -> AppResult<ConnectionManager> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(conn_config.connection_timeout_secs))
            .set_response_timeout(Duration::from_secs(conn_config.response_timeout_secs))
            .set_number_of_retries(conn_config.reconnection_retries)
            .set_exponent_base(conn_config.retry_exponent_base)
            .set_max_delay(conn_config.max_retry_delay_ms);

        let max_retries = conn_config.initial_connection_retries;
        let mut attempt = 0;

        loop {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await {
                Ok(manager) => {
                    if attempt > 0 {
                        info!("Redis connection established after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) if attempt < max_retries => {
                    let delay_ms = conn_config.retry_delay_ms(attempt);
                    warn!(
                        "Redis connection attempt {}/{} failed, retrying in {}ms: {}",
                        attempt + 1,
                        max_retries + 1,
                        delay_ms,
                        e
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(AppError::unavailable(
                        "redis",
                        format!("failed to connect after {} attempts: {e}", max_retries + 1),
                    )
                    .with_source(e));
                }
            }
        }
    }

    /// Subscriber loop: one pub/sub session at a time, reconnecting on loss
    async fn listen_loop(
        client: Client,
        channel: String,
        remote_tx: broadcast::Sender<RemoteMessage>,
        max_backoff: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(LISTEN_INITIAL_BACKOFF_MS), max_backoff);

        loop {
            tokio::select! {
                result = Self::listen_once(&client, &channel, &remote_tx, &mut backoff) => {
                    match result {
                        Ok(()) => warn!(%channel, "Redis pub/sub stream ended, cross-process fanout degraded"),
                        Err(e) => warn!(%channel, error = %e, "Redis pub/sub connection lost, cross-process fanout degraded"),
                    }
                }
                _ = shutdown.changed() => break,
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting Redis subscriber");
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!(%channel, "Redis subscriber stopped");
    }

    async fn listen_once(
        client: &Client,
        channel: &str,
        remote_tx: &broadcast::Sender<RemoteMessage>,
        backoff: &mut ReconnectBackoff,
    ) -> AppResult<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        backoff.reset();
        info!(%channel, "Subscribed to Redis notification channel");

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Ignoring non-text Redis pub/sub payload");
                    continue;
                }
            };
            match serde_json::from_str::<RemoteMessage>(&payload) {
                Ok(message) => {
                    // Err only means no dispatcher is subscribed yet
                    let _ = remote_tx.send(message);
                }
                Err(e) => warn!(error = %e, "Ignoring malformed remote notification message"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationBackend for RedisBackend {
    async fn start(&self) -> AppResult<()> {
        let client = self.client.clone();
        let channel = self.channel.clone();
        let remote_tx = self.remote_tx.clone();
        let max_backoff = self.listen_max_backoff;
        self.listener
            .spawn(move |shutdown| {
                Self::listen_loop(client, channel, remote_tx, max_backoff, shutdown)
            })
            .await;
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.listener.shutdown().await;
        self.store.close().await;
        Ok(())
    }

    async fn store(&self, notification: &Notification) -> AppResult<Option<Uuid>> {
        self.store.store(notification).await
    }

    async fn remove(&self, id: Uuid) -> AppResult<Option<ScopeKey>> {
        self.store.remove(id).await
    }

    async fn remove_by_group(&self, target: &ScopeKey, group: &str) -> AppResult<Option<Uuid>> {
        self.store.remove_by_group(target, group).await
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Notification>> {
        self.store.get(id).await
    }

    async fn get_mode(&self, id: Uuid) -> AppResult<Option<DeliveryMode>> {
        self.store.get_mode(id).await
    }

    async fn get_queued(&self, target: &ScopeKey) -> AppResult<Vec<Notification>> {
        self.store.get_queued(target).await
    }

    async fn get_since(
        &self,
        target: &ScopeKey,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        self.store.get_since(target, since).await
    }

    async fn publish(&self, message: &RemoteMessage) -> AppResult<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.manager.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        debug!(receivers, id = %message.event.id(), "Published notification event to Redis");
        Ok(())
    }

    fn subscribe_remote(&self) -> broadcast::Receiver<RemoteMessage> {
        self.remote_tx.subscribe()
    }

    async fn purge_expired(
        &self,
        queued_before: DateTime<Utc>,
        timeseries_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.store
            .purge_expired(queued_before, timeseries_before)
            .await
    }

    async fn health_check(&self) -> AppResult<()> {
        self.store.health_check().await?;
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }
}
