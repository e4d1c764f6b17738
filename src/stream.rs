// ABOUTME: Three-phase stream session per client connection: flush stored state, sync, then live push
// ABOUTME: Registers before flushing so nothing committed during replay is lost, deduplicating overlap
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::registry::Connection;
use crate::service::NotificationService;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use pulse_core::errors::AppResult;
use pulse_core::models::{Notification, ScopeKey, StreamEvent};
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One unit of output on a notification stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// A notification or dismissal, sent as an SSE `message` event
    Message(StreamEvent),
    /// End of replay; the client now holds the authoritative queued state
    Sync,
}

/// A connected client between registration and disconnect
pub struct StreamSession {
    connection: Connection,
    flushed: Vec<Notification>,
}

impl StreamSession {
    /// Register a connection for `scopes` and load its replay set
    ///
    /// The replay set holds every stored queued notification for each scope
    /// and, when `since` is given, every stored timeseries notification
    /// created after it, oldest first without duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend reads fail
    pub async fn open(
        service: &NotificationService,
        scopes: Vec<ScopeKey>,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Self> {
        let connection = service.connect(scopes);

        let mut flushed = Vec::new();
        for scope in connection.scopes() {
            flushed.extend(
                service
                    .get_queued(scope.scope, &scope.scope_id)
                    .await?,
            );
            if let Some(since) = since {
                flushed.extend(
                    service
                        .get_since(scope.scope, &scope.scope_id, since)
                        .await?,
                );
            }
        }

        let mut seen = HashSet::new();
        flushed.retain(|n| seen.insert(n.id));
        flushed.sort_by_key(|n| n.created_at);

        info!(
            connection_id = %connection.id(),
            replayed = flushed.len(),
            since = ?since,
            "Notification stream opened"
        );
        Ok(Self {
            connection,
            flushed,
        })
    }

    /// Flush, then sync, then live events until the client goes away
    pub fn into_frames(self) -> impl Stream<Item = StreamFrame> + Send {
        let Self {
            mut connection,
            flushed,
        } = self;

        async_stream::stream! {
            let mut replayed: HashSet<Uuid> = flushed.iter().map(|n| n.id).collect();
            for notification in flushed {
                yield StreamFrame::Message(StreamEvent::notify(notification));
            }

            yield StreamFrame::Sync;

            loop {
                match connection.recv().await {
                    Ok(event) => {
                        // Committed during flush and already replayed
                        if matches!(event, StreamEvent::Notify { .. }) && replayed.remove(&event.id()) {
                            continue;
                        }
                        yield StreamFrame::Message(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            connection_id = %connection.id(),
                            skipped,
                            "Notification stream queue overflowed, oldest events dropped"
                        );
                    }
                    Err(RecvError::Closed) => {
                        debug!(connection_id = %connection.id(), "Notification stream closed");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryBackend;
    use crate::config::NotificationConfig;
    use futures_util::StreamExt;
    use pulse_core::models::DeliveryMode;
    use serde_json::Map;
    use std::pin::pin;

    #[tokio::test]
    async fn test_flush_dedupes_live_overlap() {
        let service = NotificationService::new(InMemoryBackend::new(), NotificationConfig::default());
        let session = StreamSession::open(&service, vec![ScopeKey::session("s1")], None).await;
        let Ok(mut session) = session else {
            panic!("open failed");
        };

        // Simulate a notification committed between registration and flush read
        let late = service
            .notify_session("s1", "generic", DeliveryMode::Queued, None, Map::new())
            .await;
        let Ok(Some(late)) = late else {
            panic!("notify failed");
        };
        session.flushed.push(late.clone());
        let after = service
            .notify_session("s1", "generic", DeliveryMode::Ephemeral, None, Map::new())
            .await;
        let Ok(Some(after)) = after else {
            panic!("notify failed");
        };

        let mut frames = pin!(session.into_frames());
        assert_eq!(
            frames.next().await,
            Some(StreamFrame::Message(StreamEvent::notify(late)))
        );
        assert_eq!(frames.next().await, Some(StreamFrame::Sync));
        assert_eq!(
            frames.next().await,
            Some(StreamFrame::Message(StreamEvent::notify(after)))
        );
    }
}
