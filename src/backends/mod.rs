// ABOUTME: Notification backend abstraction for storage and cross-process fanout
// ABOUTME: Pluggable implementations (in-memory, Redis pub/sub, PostgreSQL LISTEN/NOTIFY)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Notification Backends
//!
//! A backend owns every stored notification row and the transport that carries
//! events to other processes. The Notification Service never writes rows itself.
//!
//! | Backend    | Storage               | Fanout                 |
//! |------------|-----------------------|------------------------|
//! | `memory`   | process-local maps    | none (single instance) |
//! | `redis`    | relational rows       | Redis pub/sub          |
//! | `postgres` | relational rows       | LISTEN/NOTIFY          |

/// Backend factory selected by configuration
pub mod factory;
/// In-memory backend
pub mod memory;
/// `PostgreSQL` rows with LISTEN/NOTIFY fanout
pub mod postgres;
/// Relational rows with Redis pub/sub fanout
pub mod redis;
/// Durable row store shared by both durable backends
pub mod sql;

pub use factory::Backend;

use crate::config::BackendKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::errors::AppResult;
use pulse_core::models::{DeliveryMode, Notification, ScopeKey, StreamEvent};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Event envelope exchanged between processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Instance id of the publishing process
    pub origin: Uuid,
    /// The event to deliver to matching connections
    pub event: StreamEvent,
}

impl RemoteMessage {
    /// Wrap an event published by `origin`
    #[must_use]
    pub const fn new(origin: Uuid, event: StreamEvent) -> Self {
        Self { origin, event }
    }
}

/// Storage and fanout contract shared by all backends
///
/// Every operation is safe to call concurrently from multiple producers and
/// multiple stream sessions.
#[async_trait]
pub trait NotificationBackend: Send + Sync + Clone {
    /// Open subscriptions and background listeners
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be reached
    async fn start(&self) -> AppResult<()>;

    /// Stop listeners and close connections
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown fails
    async fn stop(&self) -> AppResult<()>;

    /// Persist a notification
    ///
    /// When the notification carries a group key, any prior holder of
    /// `(scope, scope_id, group)` is removed in the same atomic unit and its
    /// id is returned, whatever the holder's mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails
    async fn store(&self, notification: &Notification) -> AppResult<Option<Uuid>>;

    /// Remove a stored notification, returning the scope it was addressed to
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    async fn remove(&self, id: Uuid) -> AppResult<Option<ScopeKey>>;

    /// Remove the queued holder of a group key, returning its id
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    async fn remove_by_group(&self, target: &ScopeKey, group: &str) -> AppResult<Option<Uuid>>;

    /// Look up a stored notification
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails
    async fn get(&self, id: Uuid) -> AppResult<Option<Notification>>;

    /// Delivery mode of a stored notification
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails
    async fn get_mode(&self, id: Uuid) -> AppResult<Option<DeliveryMode>> {
        Ok(self.get(id).await?.map(|n| n.mode))
    }

    /// Stored queued notifications for a scope, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails
    async fn get_queued(&self, target: &ScopeKey) -> AppResult<Vec<Notification>>;

    /// Stored timeseries notifications for a scope created after `since`, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails
    async fn get_since(
        &self,
        target: &ScopeKey,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>>;

    /// Publish an event to every other process
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the message
    async fn publish(&self, message: &RemoteMessage) -> AppResult<()>;

    /// Subscribe to events published by other processes
    fn subscribe_remote(&self) -> broadcast::Receiver<RemoteMessage>;

    /// Delete queued rows stored before `queued_before` and timeseries rows
    /// stored before `timeseries_before`, returning the number deleted
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    async fn purge_expired(
        &self,
        queued_before: DateTime<Utc>,
        timeseries_before: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Verify the backend is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the store or transport is unreachable
    async fn health_check(&self) -> AppResult<()>;

    /// Which implementation this is
    fn kind(&self) -> BackendKind;
}

/// Exponential reconnect delay shared by the pub/sub listeners
#[derive(Debug, Clone)]
pub(crate) struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Called once a subscription is established again
    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Background listener task with a cooperative shutdown signal
pub(crate) struct ListenerTask {
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerTask {
    pub(crate) fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the listener unless one is already running
    pub(crate) async fn spawn<F, Fut>(&self, run: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut + Send,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shutdown_tx.send_replace(false);
        *handle = Some(tokio::spawn(run(self.shutdown_tx.subscribe())));
    }

    /// Signal shutdown and wait for the listener to exit
    pub(crate) async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Notification listener task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_caps_and_resets() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_listener_task_stops_on_shutdown() {
        let task = ListenerTask::new();
        task.spawn(|mut shutdown| async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        task.shutdown().await;
        assert!(task.handle.lock().await.is_none());
    }
}
