// ABOUTME: Notification Service facade producers call to notify, dismiss, and query notifications
// ABOUTME: Owns scope validation, group-key replacement ordering, mode policy, and local fanout
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Notification Service
//!
//! Producers call [`NotificationService::notify`] and friends from request
//! handling code. The service validates the request, consults the
//! before-send hook, asks the active backend to store durable modes, then
//! pushes the resulting events to live connections of this process and
//! publishes them for other processes.
//!
//! ## Mode policy
//!
//! | Mode         | Stored | Replayed              | Dismissible |
//! |--------------|--------|-----------------------|-------------|
//! | `queued`     | yes    | on every connect      | yes         |
//! | `timeseries` | yes    | with `?since=` only   | no          |
//! | `ephemeral`  | no     | never                 | no          |
//!
//! Broadcast notifications are always treated as ephemeral.

use crate::backends::{Backend, NotificationBackend, RemoteMessage};
use crate::cleanup::CleanupScheduler;
use crate::config::NotificationConfig;
use crate::hooks::{run_before_send, spawn_after, HookDecision, NoopHooks, NotificationHooks};
use crate::registry::{Connection, ConnectionRegistry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use pulse_core::constants::notifications::DISMISSED_TYPE;
use pulse_core::errors::{AppError, AppResult};
use pulse_core::models::{DeliveryMode, Notification, NotificationScope, ScopeKey, StreamEvent};
use serde_json::{Map, Value};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Facade over the active backend and the local connection registry
pub struct NotificationService {
    instance_id: Uuid,
    backend: Backend,
    registry: Arc<ConnectionRegistry>,
    hooks: Arc<dyn NotificationHooks>,
    config: NotificationConfig,
    scope_locks: DashMap<ScopeKey, Arc<Mutex<()>>>,
    recent_ephemeral: Mutex<LruCache<Uuid, ()>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationService {
    /// Build a service over `backend` with no-op hooks
    #[must_use]
    pub fn new(backend: impl Into<Backend>, config: NotificationConfig) -> Self {
        Self::with_hooks(backend, config, Arc::new(NoopHooks))
    }

    /// Build a service that consults `hooks` around delivery
    #[must_use]
    pub fn with_hooks(
        backend: impl Into<Backend>,
        config: NotificationConfig,
        hooks: Arc<dyn NotificationHooks>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.recent_ephemeral_capacity).unwrap_or(NonZeroUsize::MIN);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            instance_id: Uuid::new_v4(),
            backend: backend.into(),
            registry: Arc::new(ConnectionRegistry::new(config.queue_capacity)),
            hooks,
            config,
            scope_locks: DashMap::new(),
            recent_ephemeral: Mutex::new(LruCache::new(capacity)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the backend, the remote dispatcher and, for durable backends, the cleanup scheduler
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to start
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        let remote = self.backend.subscribe_remote();
        self.backend.start().await?;
        self.shutdown_tx.send_replace(false);

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(
            Arc::clone(self).dispatch_remote(remote, self.shutdown_tx.subscribe()),
        ));

        if self.backend.kind().is_durable() {
            let scheduler = CleanupScheduler::new(self.backend.clone(), &self.config);
            tasks.push(scheduler.spawn(self.shutdown_tx.subscribe()));
        }
        drop(tasks);

        info!(
            instance_id = %self.instance_id,
            backend = %self.backend.kind(),
            "Notification service started"
        );
        Ok(())
    }

    /// Close open streams, stop background tasks, then the backend
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to stop cleanly
    pub async fn stop(&self) -> AppResult<()> {
        self.shutdown_tx.send_replace(true);
        let closed = self.registry.close_all();
        if closed > 0 {
            info!(closed, "Closed open notification streams");
        }
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Notification service task ended abnormally");
            }
        }
        self.backend.stop().await?;
        info!(instance_id = %self.instance_id, "Notification service stopped");
        Ok(())
    }

    /// Send a notification to one session or user
    ///
    /// Returns `None` when the before-send hook suppressed it.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid input or if a durable store fails
    pub async fn notify(
        &self,
        scope: NotificationScope,
        scope_id: &str,
        kind: &str,
        mode: DeliveryMode,
        group: Option<&str>,
        payload: Map<String, Value>,
    ) -> AppResult<Option<Notification>> {
        if scope_id.is_empty() {
            return Err(AppError::invalid_input(format!("{scope} id must not be empty")));
        }
        let target = ScopeKey {
            scope,
            scope_id: scope_id.to_owned(),
        };
        self.dispatch(Notification::new(
            Some(target),
            kind,
            mode,
            group.map(str::to_owned),
            payload,
        ))
        .await
    }

    /// Send a notification to one session
    ///
    /// # Errors
    ///
    /// See [`Self::notify`]
    pub async fn notify_session(
        &self,
        session_id: &str,
        kind: &str,
        mode: DeliveryMode,
        group: Option<&str>,
        payload: Map<String, Value>,
    ) -> AppResult<Option<Notification>> {
        self.notify(NotificationScope::Session, session_id, kind, mode, group, payload)
            .await
    }

    /// Send a notification to every session of one user
    ///
    /// # Errors
    ///
    /// See [`Self::notify`]
    pub async fn notify_user(
        &self,
        user_id: &str,
        kind: &str,
        mode: DeliveryMode,
        group: Option<&str>,
        payload: Map<String, Value>,
    ) -> AppResult<Option<Notification>> {
        self.notify(NotificationScope::User, user_id, kind, mode, group, payload)
            .await
    }

    /// Send a notification to every connected client
    ///
    /// Never stored. The group key travels with the message so clients can
    /// replace their own previous toast carrying the same key.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid input
    pub async fn notify_broadcast(
        &self,
        kind: &str,
        group: Option<&str>,
        payload: Map<String, Value>,
    ) -> AppResult<Option<Notification>> {
        self.dispatch(Notification::new(
            None,
            kind,
            DeliveryMode::Ephemeral,
            group.map(str::to_owned),
            payload,
        ))
        .await
    }

    async fn dispatch(&self, notification: Notification) -> AppResult<Option<Notification>> {
        Self::validate(&notification)?;

        if run_before_send(self.hooks.as_ref(), &notification).await == HookDecision::Suppress {
            debug!(id = %notification.id, kind = %notification.kind, "Notification suppressed by hook");
            return Ok(None);
        }

        match &notification.target {
            // Writers to one scope commit and emit in the same order
            Some(target) if notification.mode.is_persisted() => {
                let lock = self.scope_lock(target);
                let guard = lock.lock().await;
                let replaced = self.backend.store(&notification).await;
                if let Ok(Some(old_id)) = replaced {
                    debug!(
                        %old_id,
                        new_id = %notification.id,
                        group = ?notification.group,
                        "Replacing grouped notification"
                    );
                    self.emit(StreamEvent::dismissed(old_id, Some(target.clone())))
                        .await;
                }
                if replaced.is_ok() {
                    self.emit(StreamEvent::notify(notification.clone())).await;
                }
                drop(guard);
                drop(lock);
                self.release_scope_lock(target);
                replaced?;
            }
            _ => {
                self.remember_ephemeral(notification.id).await;
                self.emit(StreamEvent::notify(notification.clone())).await;
            }
        }

        spawn_after(Arc::clone(&self.hooks), StreamEvent::notify(notification.clone()));
        Ok(Some(notification))
    }

    fn validate(notification: &Notification) -> AppResult<()> {
        if notification.kind.is_empty() {
            return Err(AppError::invalid_input("notification type must not be empty"));
        }
        if notification.kind == DISMISSED_TYPE {
            return Err(AppError::invalid_input(format!(
                "notification type '{DISMISSED_TYPE}' is reserved"
            )));
        }
        if notification.group.as_deref().is_some_and(str::is_empty) {
            return Err(AppError::invalid_input("group key must not be empty"));
        }
        Ok(())
    }

    /// Dismiss a queued notification by id
    ///
    /// # Errors
    ///
    /// `NotDismissible` for timeseries, ephemeral and broadcast notifications,
    /// `ResourceNotFound` for unknown ids
    pub async fn dismiss(&self, id: Uuid) -> AppResult<()> {
        if self.recent_ephemeral.lock().await.contains(&id) {
            return Err(AppError::not_dismissible());
        }

        let mode = self
            .get_mode(id)
            .await?
            .ok_or_else(|| AppError::not_found("notification"))?;
        if !mode.is_dismissible() {
            return Err(AppError::not_dismissible());
        }

        // A concurrent dismiss or group replacement may have removed it first
        let target = self
            .backend
            .remove(id)
            .await?
            .ok_or_else(|| AppError::not_found("notification"))?;

        info!(%id, %target, "Notification dismissed");
        self.emit_dismissed(id, Some(target)).await;
        Ok(())
    }

    /// Dismiss the queued holder of a group key, if any
    ///
    /// Returns the dismissed id; calling it again is a no-op. Timeseries
    /// holders are left to expire.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails
    pub async fn dismiss_by_group(
        &self,
        scope: NotificationScope,
        scope_id: &str,
        group: &str,
    ) -> AppResult<Option<Uuid>> {
        let target = ScopeKey {
            scope,
            scope_id: scope_id.to_owned(),
        };
        let lock = self.scope_lock(&target);
        let guard = lock.lock().await;
        let removed = self.backend.remove_by_group(&target, group).await;
        if let Ok(Some(id)) = removed {
            info!(%id, %target, %group, "Notification dismissed by group");
            self.emit_dismissed(id, Some(target.clone())).await;
        }
        drop(guard);
        drop(lock);
        self.release_scope_lock(&target);
        removed
    }

    /// Stored queued notifications for a scope, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails
    pub async fn get_queued(
        &self,
        scope: NotificationScope,
        scope_id: &str,
    ) -> AppResult<Vec<Notification>> {
        self.backend
            .get_queued(&ScopeKey {
                scope,
                scope_id: scope_id.to_owned(),
            })
            .await
    }

    /// Stored timeseries notifications for a scope created after `since`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails
    pub async fn get_since(
        &self,
        scope: NotificationScope,
        scope_id: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        self.backend
            .get_since(
                &ScopeKey {
                    scope,
                    scope_id: scope_id.to_owned(),
                },
                since,
            )
            .await
    }

    /// Delivery mode of a stored notification, `None` if nothing is stored under `id`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails
    pub async fn get_mode(&self, id: Uuid) -> AppResult<Option<DeliveryMode>> {
        self.backend.get_mode(id).await
    }

    /// Register a live connection for `scopes`
    #[must_use]
    pub fn connect(&self, scopes: Vec<ScopeKey>) -> Connection {
        self.registry.register(scopes)
    }

    /// Live connections of this process
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The active backend
    #[must_use]
    pub const fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Settings this service was built with
    #[must_use]
    pub const fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Origin id stamped on every message this process publishes
    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    async fn emit_dismissed(&self, id: Uuid, target: Option<ScopeKey>) {
        let event = StreamEvent::dismissed(id, target);
        self.emit(event.clone()).await;
        spawn_after(Arc::clone(&self.hooks), event);
    }

    /// Deliver locally, then publish for other processes
    async fn emit(&self, event: StreamEvent) {
        self.registry.deliver(&event);
        let message = RemoteMessage::new(self.instance_id, event);
        if let Err(e) = self.backend.publish(&message).await {
            warn!(
                id = %message.event.id(),
                error = %e,
                "Failed to publish notification event, cross-process fanout degraded"
            );
        }
    }

    async fn remember_ephemeral(&self, id: Uuid) {
        self.recent_ephemeral.lock().await.put(id, ());
    }

    fn scope_lock(&self, target: &ScopeKey) -> Arc<Mutex<()>> {
        Arc::clone(self.scope_locks.entry(target.clone()).or_default().value())
    }

    /// Drop the lock entry once nobody else holds or waits on it
    fn release_scope_lock(&self, target: &ScopeKey) {
        self.scope_locks
            .remove_if(target, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Forward events published by other processes to local connections
    async fn dispatch_remote(
        self: Arc<Self>,
        mut remote: broadcast::Receiver<RemoteMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = remote.recv() => match received {
                    Ok(message) if message.origin == self.instance_id => {}
                    Ok(message) => {
                        if let StreamEvent::Notify { notification } = &message.event {
                            if !notification.mode.is_persisted() || notification.is_broadcast() {
                                self.remember_ephemeral(notification.id).await;
                            }
                        }
                        self.registry.deliver(&message.event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Remote notification dispatcher lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!(instance_id = %self.instance_id, "Remote notification dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryBackend;
    use std::time::Duration;
    use tokio::time::timeout;

    fn service() -> Arc<NotificationService> {
        Arc::new(NotificationService::new(
            InMemoryBackend::new(),
            NotificationConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_ungrouped_persisted_writes_wait_for_scope_lock() -> AppResult<()> {
        let service = service();
        let target = ScopeKey::session("s1");
        let mut listener = service.connect(vec![target.clone()]);

        let lock = service.scope_lock(&target);
        let guard = lock.lock().await;
        let producer = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .notify_session("s1", "generic", DeliveryMode::Queued, None, Map::new())
                    .await
            })
        };

        // Neither stored nor emitted while another writer holds the scope
        assert!(timeout(Duration::from_millis(100), listener.recv()).await.is_err());
        assert!(service.backend().get_queued(&target).await?.is_empty());

        drop(guard);
        let event = timeout(Duration::from_secs(2), listener.recv()).await;
        let sent = producer
            .await
            .map_err(|e| AppError::internal(e.to_string()))??;
        assert!(sent.is_some());
        if let Some(sent) = sent {
            assert!(matches!(event, Ok(Ok(received)) if received == StreamEvent::notify(sent)));
        }

        // Ephemeral writes never take the lock
        let ephemeral = service
            .notify_session("s1", "progress", DeliveryMode::Ephemeral, None, Map::new())
            .await?;
        assert!(ephemeral.is_some());

        drop(lock);
        service.release_scope_lock(&target);
        assert!(service.scope_locks.is_empty());
        Ok(())
    }
}
