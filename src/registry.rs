// ABOUTME: In-process registry of live stream connections indexed by scope
// ABOUTME: Each connection owns a bounded drop-oldest queue so slow clients never block producers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pulse_core::models::{ScopeKey, StreamEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Monitoring view of one connection
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Registry-assigned id
    pub connection_id: Uuid,
    /// Scopes the connection receives events for
    pub scopes: Vec<ScopeKey>,
    /// When the stream was opened
    pub created_at: DateTime<Utc>,
    /// Last successful delivery, or `created_at` if none yet
    pub last_seen: DateTime<Utc>,
}

struct ConnectionEntry {
    sender: broadcast::Sender<StreamEvent>,
    scopes: Vec<ScopeKey>,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Live connections of this process
///
/// Delivery uses one `broadcast` channel per connection with a single
/// receiver. A full channel overwrites its oldest entry and the receiver
/// observes `Lagged(n)`, so delivery never waits on a reader.
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ConnectionEntry>,
    by_scope: DashMap<ScopeKey, HashSet<Uuid>>,
    capacity: usize,
}

impl ConnectionRegistry {
    /// Empty registry whose connections each buffer up to `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            by_scope: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a connection subscribed to `scopes`
    ///
    /// The returned [`Connection`] unregisters itself when dropped.
    #[must_use]
    pub fn register(self: &Arc<Self>, scopes: Vec<ScopeKey>) -> Connection {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = broadcast::channel(self.capacity);
        let now = Utc::now();

        for scope in &scopes {
            self.by_scope
                .entry(scope.clone())
                .or_default()
                .insert(connection_id);
        }
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                scopes: scopes.clone(),
                created_at: now,
                last_seen: now,
            },
        );

        info!(%connection_id, scopes = ?scopes, "Registered notification stream");
        Connection {
            connection_id,
            scopes,
            receiver,
            registry: Arc::clone(self),
        }
    }

    /// Remove a connection and its scope index entries
    pub fn unregister(&self, connection_id: Uuid) {
        let Some((_, entry)) = self.connections.remove(&connection_id) else {
            return;
        };
        for scope in &entry.scopes {
            self.by_scope.remove_if_mut(scope, |_, ids| {
                ids.remove(&connection_id);
                ids.is_empty()
            });
        }
        info!(%connection_id, "Unregistered notification stream");
    }

    /// Drop every connection's sender so each open stream sees `Closed` and ends
    ///
    /// Returns how many connections were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();
        for connection_id in &ids {
            self.unregister(*connection_id);
        }
        ids.len()
    }

    /// Push an event to every matching connection, returning how many received it
    ///
    /// Broadcast events (no target) go to every connection.
    pub fn deliver(&self, event: &StreamEvent) -> usize {
        let recipients: Vec<Uuid> = match event.target() {
            Some(target) => self
                .by_scope
                .get(target)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            None => self.connections.iter().map(|entry| *entry.key()).collect(),
        };

        let now = Utc::now();
        let mut delivered = 0;
        for connection_id in recipients {
            if let Some(mut entry) = self.connections.get_mut(&connection_id) {
                // Err means the receiver is gone; its guard unregisters shortly
                if entry.sender.send(event.clone()).is_ok() {
                    entry.last_seen = now;
                    delivered += 1;
                }
            }
        }

        debug!(id = %event.id(), delivered, "Delivered event to local connections");
        delivered
    }

    /// Number of registered connections
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of every live connection
    #[must_use]
    pub fn metadata(&self) -> Vec<ConnectionMetadata> {
        self.connections
            .iter()
            .map(|entry| ConnectionMetadata {
                connection_id: *entry.key(),
                scopes: entry.scopes.clone(),
                created_at: entry.created_at,
                last_seen: entry.last_seen,
            })
            .collect()
    }
}

/// One registered stream: its queue receiver plus an unregister-on-drop guard
pub struct Connection {
    connection_id: Uuid,
    scopes: Vec<ScopeKey>,
    receiver: broadcast::Receiver<StreamEvent>,
    registry: Arc<ConnectionRegistry>,
}

impl Connection {
    /// Registry-assigned id
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.connection_id
    }

    /// Scopes this connection receives events for
    #[must_use]
    pub fn scopes(&self) -> &[ScopeKey] {
        &self.scopes
    }

    /// Next queued event
    ///
    /// # Errors
    ///
    /// `Lagged(n)` when `n` events were overwritten; the next call resumes
    /// with the oldest retained event
    pub async fn recv(&mut self) -> Result<StreamEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.registry.unregister(self.connection_id);
    }
}
