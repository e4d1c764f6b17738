// ABOUTME: Durable notification backend using PostgreSQL rows and LISTEN/NOTIFY for fanout
// ABOUTME: Listener reconnects with exponential backoff; oversize events travel by reference
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::sql::SqlStore;
use super::{ListenerTask, NotificationBackend, ReconnectBackoff, RemoteMessage};
use crate::config::{BackendKind, NotificationConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::constants::notifications::{
    LISTEN_INITIAL_BACKOFF_MS, PG_NOTIFY_CHANNEL, PG_NOTIFY_MAX_PAYLOAD_BYTES,
    REMOTE_CHANNEL_CAPACITY,
};
use pulse_core::errors::{AppError, AppResult};
use pulse_core::models::{DeliveryMode, Notification, ScopeKey, StreamEvent};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What actually travels over the NOTIFY channel
///
/// NOTIFY payloads are capped just under 8000 bytes. A stored notification too
/// large to inline is sent as its id and re-read from the table by receivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "envelope", rename_all = "snake_case")]
enum NotifyEnvelope {
    Inline { message: RemoteMessage },
    Stored { origin: Uuid, id: Uuid },
}

/// Rows and fanout both in `PostgreSQL`
#[derive(Clone)]
pub struct PostgresBackend {
    store: SqlStore,
    listen_max_backoff: Duration,
    remote_tx: broadcast::Sender<RemoteMessage>,
    listener: Arc<ListenerTask>,
}

impl PostgresBackend {
    /// Wrap a row store; LISTEN connections reuse its pool's connect options
    #[must_use]
    pub fn new(store: SqlStore, config: &NotificationConfig) -> Self {
        let (remote_tx, _) = broadcast::channel(REMOTE_CHANNEL_CAPACITY);
        Self {
            store,
            listen_max_backoff: Duration::from_millis(config.listen_max_backoff_ms),
            remote_tx,
            listener: Arc::new(ListenerTask::new()),
        }
    }

    async fn listen_loop(
        store: SqlStore,
        remote_tx: broadcast::Sender<RemoteMessage>,
        max_backoff: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(LISTEN_INITIAL_BACKOFF_MS), max_backoff);

        loop {
            tokio::select! {
                result = Self::listen_once(&store, &remote_tx, &mut backoff) => {
                    if let Err(e) = result {
                        warn!(error = %e, "LISTEN connection lost, cross-process fanout degraded");
                    }
                }
                _ = shutdown.changed() => break,
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting LISTEN connection");
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!("LISTEN task stopped");
    }

    /// One LISTEN session; only returns on error
    async fn listen_once(
        store: &SqlStore,
        remote_tx: &broadcast::Sender<RemoteMessage>,
        backoff: &mut ReconnectBackoff,
    ) -> AppResult<()> {
        let mut listener = PgListener::connect_with(store.pool()).await?;
        listener.listen(PG_NOTIFY_CHANNEL).await?;
        backoff.reset();
        info!(channel = PG_NOTIFY_CHANNEL, "Listening for notification events");

        loop {
            // `None` means the connection dropped; try_recv would silently reconnect
            // on the next call, so surface it to run our own backoff instead
            let Some(notification) = listener.try_recv().await? else {
                return Err(AppError::unavailable("postgres", "LISTEN connection closed"));
            };

            match serde_json::from_str::<NotifyEnvelope>(notification.payload()) {
                Ok(envelope) => {
                    if let Some(message) = Self::resolve(store, envelope).await {
                        // Err only means no dispatcher is subscribed yet
                        let _ = remote_tx.send(message);
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed NOTIFY payload"),
            }
        }
    }

    async fn resolve(store: &SqlStore, envelope: NotifyEnvelope) -> Option<RemoteMessage> {
        match envelope {
            NotifyEnvelope::Inline { message } => Some(message),
            NotifyEnvelope::Stored { origin, id } => match store.get(id).await {
                Ok(Some(notification)) => Some(RemoteMessage::new(
                    origin,
                    StreamEvent::notify(notification),
                )),
                Ok(None) => {
                    debug!(%id, "Referenced notification already gone, skipping");
                    None
                }
                Err(e) => {
                    warn!(%id, error = %e, "Failed to load referenced notification");
                    None
                }
            },
        }
    }

    /// Serialize an event for NOTIFY, falling back to a by-reference envelope
    fn encode(message: &RemoteMessage) -> AppResult<String> {
        let inline = serde_json::to_string(&NotifyEnvelope::Inline {
            message: message.clone(),
        })?;
        if inline.len() <= PG_NOTIFY_MAX_PAYLOAD_BYTES {
            return Ok(inline);
        }

        match &message.event {
            StreamEvent::Notify { notification }
                if notification.mode.is_persisted() && !notification.is_broadcast() =>
            {
                Ok(serde_json::to_string(&NotifyEnvelope::Stored {
                    origin: message.origin,
                    id: notification.id,
                })?)
            }
            _ => Err(AppError::external_service(
                "postgres",
                format!(
                    "NOTIFY payload of {} bytes exceeds the {PG_NOTIFY_MAX_PAYLOAD_BYTES} byte limit",
                    inline.len()
                ),
            )),
        }
    }
}

#[async_trait]
impl NotificationBackend for PostgresBackend {
    async fn start(&self) -> AppResult<()> {
        let store = self.store.clone();
        let remote_tx = self.remote_tx.clone();
        let max_backoff = self.listen_max_backoff;
        self.listener
            .spawn(move |shutdown| Self::listen_loop(store, remote_tx, max_backoff, shutdown))
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
        let payload = Self::encode(message)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(PG_NOTIFY_CHANNEL)
            .bind(&payload)
            .execute(self.store.pool())
            .await?;
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
        self.store.health_check().await
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }
}
