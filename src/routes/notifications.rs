// ABOUTME: Notification HTTP endpoints: the SSE stream and the dismiss operations
// ABOUTME: Streams emit named message and sync events with comment-only keepalives
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Notification routes
//!
//! - `GET /notifications/stream[?since=<unix_timestamp>]`
//! - `DELETE /notifications/{id}` (204, 404, or 409 when not dismissible)
//! - `DELETE /notifications/group/{group}` (always 204)

use super::identity::CallerIdentity;
use crate::service::NotificationService;
use crate::stream::{StreamFrame, StreamSession};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use pulse_core::errors::{AppError, AppResult};
use pulse_core::models::NotificationScope;
use serde::Deserialize;
use std::convert::Infallible;
use std::iter;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Query parameters accepted by the stream endpoint
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Unix timestamp, fractional seconds allowed; malformed values are ignored
    pub since: Option<String>,
}

/// Notification routes implementation
pub struct NotificationRoutes;

impl NotificationRoutes {
    /// Create all notification routes
    pub fn routes(service: Arc<NotificationService>) -> Router {
        Router::new()
            .route("/notifications/stream", get(Self::stream))
            .route("/notifications/group/:group", delete(Self::dismiss_group))
            .route("/notifications/:id", delete(Self::dismiss))
            .with_state(service)
    }

    async fn stream(
        State(service): State<Arc<NotificationService>>,
        identity: CallerIdentity,
        Query(query): Query<StreamQuery>,
    ) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
        let since = query.since.as_deref().and_then(|raw| {
            let parsed = parse_since(raw);
            if parsed.is_none() {
                debug!(since = raw, "Ignoring malformed since parameter");
            }
            parsed
        });

        let session = StreamSession::open(&service, identity.scopes(), since).await?;
        let display_secs = service.config().timeseries_display_secs;
        let events = session.into_frames().map(move |frame| {
            Ok(match frame {
                StreamFrame::Message(event) => Event::default()
                    .event("message")
                    .data(event.to_wire(display_secs).to_string()),
                StreamFrame::Sync => Event::default().event("sync").data(""),
            })
        });

        Ok(Sse::new(events)
            .keep_alive(KeepAlive::new().interval(service.config().keepalive_interval())))
    }

    async fn dismiss(
        State(service): State<Arc<NotificationService>>,
        Path(id): Path<String>,
    ) -> AppResult<StatusCode> {
        // An id that cannot exist is simply unknown
        let id = Uuid::parse_str(&id).map_err(|_| AppError::not_found("notification"))?;
        service.dismiss(id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    async fn dismiss_group(
        State(service): State<Arc<NotificationService>>,
        identity: CallerIdentity,
        Path(group): Path<String>,
    ) -> AppResult<StatusCode> {
        service
            .dismiss_by_group(NotificationScope::Session, &identity.session_id, &group)
            .await?;
        if let Some(user_id) = &identity.user_id {
            service
                .dismiss_by_group(NotificationScope::User, user_id, &group)
                .await?;
        }
        Ok(StatusCode::NO_CONTENT)
    }
}

/// Parse `<secs>[.<fraction>]` into a UTC timestamp
fn parse_since(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let (secs, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let secs: i64 = secs.parse().ok()?;
    let nanos: String = fraction.chars().chain(iter::repeat('0')).take(9).collect();
    DateTime::from_timestamp(secs, nanos.parse().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since() {
        assert_eq!(parse_since("1700000000"), DateTime::from_timestamp(1_700_000_000, 0));
        assert_eq!(
            parse_since("1700000000.25"),
            DateTime::from_timestamp(1_700_000_000, 250_000_000)
        );
        assert_eq!(parse_since(" 12.5 "), DateTime::from_timestamp(12, 500_000_000));
        assert_eq!(parse_since("yesterday"), None);
        assert_eq!(parse_since("-5"), None);
        assert_eq!(parse_since("1.2.3"), None);
        assert_eq!(parse_since(""), None);
    }
}
