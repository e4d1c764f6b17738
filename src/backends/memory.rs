// ABOUTME: In-memory notification backend backed by scope-keyed maps
// ABOUTME: Single-instance deployments only; publish has no cross-process effect
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::{NotificationBackend, RemoteMessage};
use crate::config::BackendKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::constants::notifications::REMOTE_CHANNEL_CAPACITY;
use pulse_core::errors::AppResult;
use pulse_core::models::{DeliveryMode, Notification, ScopeKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

/// A stored notification and the moment it was written
#[derive(Debug, Clone)]
struct StoredEntry {
    notification: Notification,
    stored_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, queued_before: DateTime<Utc>, timeseries_before: DateTime<Utc>) -> bool {
        match self.notification.mode {
            DeliveryMode::Queued => self.stored_at < queued_before,
            DeliveryMode::Timeseries => self.stored_at < timeseries_before,
            DeliveryMode::Ephemeral => true,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    by_scope: HashMap<ScopeKey, Vec<StoredEntry>>,
    index: HashMap<Uuid, ScopeKey>,
}

impl MemoryState {
    fn remove(&mut self, id: Uuid) -> Option<Notification> {
        let target = self.index.remove(&id)?;
        let entries = self.by_scope.get_mut(&target)?;
        let position = entries.iter().position(|e| e.notification.id == id)?;
        let removed = entries.remove(position);
        if entries.is_empty() {
            self.by_scope.remove(&target);
        }
        Some(removed.notification)
    }

    fn group_holder(
        &self,
        target: &ScopeKey,
        group: &str,
        mode: Option<DeliveryMode>,
    ) -> Option<Uuid> {
        self.by_scope.get(target)?.iter().find_map(|e| {
            (mode.is_none_or(|m| e.notification.mode == m)
                && e.notification.group.as_deref() == Some(group))
            .then_some(e.notification.id)
        })
    }

    fn scoped(&self, target: &ScopeKey, keep: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        let mut found: Vec<Notification> = self
            .by_scope
            .get(target)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| &e.notification)
                    .filter(|n| keep(n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|n| n.created_at);
        found
    }
}

/// Process-local backend
///
/// The whole state sits behind one `RwLock`, so the group-replace critical
/// section in `store` is atomic with respect to every other write.
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    // Never sent on; subscribers simply idle
    remote_tx: broadcast::Sender<RemoteMessage>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        let (remote_tx, _) = broadcast::channel(REMOTE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            remote_tx,
        }
    }

    /// Total stored notifications across all scopes
    pub async fn len(&self) -> usize {
        self.state.read().await.index.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl NotificationBackend for InMemoryBackend {
    async fn start(&self) -> AppResult<()> {
        debug!("In-memory notification backend started");
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        debug!("In-memory notification backend stopped");
        Ok(())
    }

    async fn store(&self, notification: &Notification) -> AppResult<Option<Uuid>> {
        let Some(target) = notification.target.clone() else {
            return Ok(None);
        };
        if !notification.mode.is_persisted() {
            return Ok(None);
        }

        let mut state = self.state.write().await;

        let replaced = notification
            .group
            .as_deref()
            .and_then(|group| state.group_holder(&target, group, None))
            .and_then(|id| state.remove(id))
            .map(|old| old.id);

        state.index.insert(notification.id, target.clone());
        state.by_scope.entry(target).or_default().push(StoredEntry {
            notification: notification.clone(),
            stored_at: Utc::now(),
        });

        Ok(replaced)
    }

    async fn remove(&self, id: Uuid) -> AppResult<Option<ScopeKey>> {
        Ok(self
            .state
            .write()
            .await
            .remove(id)
            .and_then(|removed| removed.target))
    }

    async fn remove_by_group(&self, target: &ScopeKey, group: &str) -> AppResult<Option<Uuid>> {
        let mut state = self.state.write().await;
        let removed = state
            .group_holder(target, group, Some(DeliveryMode::Queued))
            .and_then(|id| state.remove(id))
            .map(|n| n.id);
        Ok(removed)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Notification>> {
        let state = self.state.read().await;
        let found = state.index.get(&id).and_then(|target| {
            state
                .by_scope
                .get(target)?
                .iter()
                .find(|e| e.notification.id == id)
                .map(|e| e.notification.clone())
        });
        Ok(found)
    }

    async fn get_queued(&self, target: &ScopeKey) -> AppResult<Vec<Notification>> {
        let state = self.state.read().await;
        Ok(state.scoped(target, |n| n.mode == DeliveryMode::Queued))
    }

    async fn get_since(
        &self,
        target: &ScopeKey,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        let state = self.state.read().await;
        Ok(state.scoped(target, |n| {
            n.mode == DeliveryMode::Timeseries && n.created_at > since
        }))
    }

    async fn publish(&self, _message: &RemoteMessage) -> AppResult<()> {
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
        let mut state = self.state.write().await;

        let expired: Vec<Uuid> = state
            .by_scope
            .values()
            .flatten()
            .filter(|e| e.is_expired(queued_before, timeseries_before))
            .map(|e| e.notification.id)
            .collect();

        for id in &expired {
            state.remove(*id);
        }
        drop(state);

        if !expired.is_empty() {
            debug!("Purged {} expired in-memory notifications", expired.len());
        }
        Ok(expired.len() as u64)
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::Map;

    fn queued(target: &ScopeKey, group: Option<&str>) -> Notification {
        Notification::new(
            Some(target.clone()),
            "generic",
            DeliveryMode::Queued,
            group.map(ToOwned::to_owned),
            Map::new(),
        )
    }

    #[tokio::test]
    async fn test_group_store_replaces_prior_holder() -> AppResult<()> {
        let backend = InMemoryBackend::new();
        let target = ScopeKey::session("s1");
        let first = queued(&target, Some("deploy"));
        let second = queued(&target, Some("deploy"));

        assert_eq!(backend.store(&first).await?, None);
        assert_eq!(backend.store(&second).await?, Some(first.id));

        let stored = backend.get_queued(&target).await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, second.id);
        assert!(backend.get(first.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_group_store_replaces_across_persisted_modes() -> AppResult<()> {
        let backend = InMemoryBackend::new();
        let target = ScopeKey::user("u1");
        let sample = |mode| {
            Notification::new(Some(target.clone()), "metric", mode, Some("cpu".to_owned()), Map::new())
        };
        let first = sample(DeliveryMode::Timeseries);
        let second = sample(DeliveryMode::Timeseries);
        let third = sample(DeliveryMode::Queued);

        assert_eq!(backend.store(&first).await?, None);
        assert_eq!(backend.store(&second).await?, Some(first.id));
        assert_eq!(backend.store(&third).await?, Some(second.id));
        assert_eq!(backend.len().await, 1);

        // Group dismissal only ever touches queued holders
        let metric = sample(DeliveryMode::Timeseries);
        backend.store(&metric).await?;
        assert_eq!(backend.remove_by_group(&target, "cpu").await?, None);
        assert_eq!(backend.remove(metric.id).await?, Some(target.clone()));
        assert_eq!(backend.remove(metric.id).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_group_keys_are_isolated_per_scope() -> AppResult<()> {
        let backend = InMemoryBackend::new();
        let a = ScopeKey::session("a");
        let b = ScopeKey::session("b");

        backend.store(&queued(&a, Some("g"))).await?;
        assert_eq!(backend.store(&queued(&b, Some("g"))).await?, None);
        assert_eq!(backend.len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_broadcast_and_ephemeral_are_not_stored() -> AppResult<()> {
        let backend = InMemoryBackend::new();
        let broadcast = Notification::new(None, "ping", DeliveryMode::Queued, None, Map::new());
        let ephemeral = Notification::new(
            Some(ScopeKey::user("u1")),
            "ping",
            DeliveryMode::Ephemeral,
            None,
            Map::new(),
        );
        backend.store(&broadcast).await?;
        backend.store(&ephemeral).await?;
        assert!(backend.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_respects_mode_ttls() -> AppResult<()> {
        let backend = InMemoryBackend::new();
        let target = ScopeKey::session("s1");
        let q = queued(&target, None);
        let ts = Notification::new(
            Some(target.clone()),
            "progress",
            DeliveryMode::Timeseries,
            None,
            Map::new(),
        );
        backend.store(&q).await?;
        backend.store(&ts).await?;

        let now = Utc::now();
        let purged = backend
            .purge_expired(now + Duration::hours(1), now - Duration::hours(1))
            .await?;
        assert_eq!(purged, 1);
        assert!(backend.get(q.id).await?.is_none());
        assert!(backend.get(ts.id).await?.is_some());
        Ok(())
    }
}
