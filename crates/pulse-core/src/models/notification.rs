// ABOUTME: Notification value type, addressing scopes, delivery modes, and stream events
// ABOUTME: Immutable after creation; replacement always mints a new notification id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

use crate::constants::notifications::DISMISSED_TYPE;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Addressing domain of a stored notification
///
/// Broadcast notifications have no scope at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationScope {
    /// One browser tab or device
    Session,
    /// Every session of one account
    User,
}

impl NotificationScope {
    /// Column/wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::User => "user",
        }
    }
}

impl fmt::Display for NotificationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "user" => Ok(Self::User),
            other => Err(format!("unknown notification scope '{other}'")),
        }
    }
}

/// Persistence, replay, expiry and dismissibility policy of a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Durable, replayed on every connect, manually dismissible
    #[default]
    Queued,
    /// Durable for `since` replay, never dismissible, expires client-side
    Timeseries,
    /// Never persisted, live listeners only
    Ephemeral,
}

impl DeliveryMode {
    /// Column/wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Timeseries => "timeseries",
            Self::Ephemeral => "ephemeral",
        }
    }

    /// Whether notifications in this mode are written to the backend
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        matches!(self, Self::Queued | Self::Timeseries)
    }

    /// Only queued notifications may be dismissed by id or group
    #[must_use]
    pub const fn is_dismissible(self) -> bool {
        matches!(self, Self::Queued)
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "timeseries" => Ok(Self::Timeseries),
            "ephemeral" => Ok(Self::Ephemeral),
            other => Err(format!("unknown delivery mode '{other}'")),
        }
    }
}

/// A `(scope, scope_id)` address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    /// Addressing domain
    pub scope: NotificationScope,
    /// Session or user identifier
    pub scope_id: String,
}

impl ScopeKey {
    /// Address a single session
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            scope: NotificationScope::Session,
            scope_id: session_id.into(),
        }
    }

    /// Address every session of a user
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            scope: NotificationScope::User,
            scope_id: user_id.into(),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.scope_id)
    }
}

/// A typed notification addressed to a session, a user, or everyone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier generated at creation
    pub id: Uuid,
    /// Type tag used by the client to pick a renderer
    #[serde(rename = "type")]
    pub kind: String,
    /// Addressee; `None` for broadcast
    pub target: Option<ScopeKey>,
    /// Replace-in-place key
    pub group: Option<String>,
    /// Lifecycle policy
    pub mode: DeliveryMode,
    /// Opaque client payload
    pub payload: Map<String, Value>,
    /// Creation timestamp, used for replay ordering
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification with a fresh id stamped now
    ///
    /// The timestamp is truncated to microseconds so it survives a round trip
    /// through the relational store unchanged.
    pub fn new(
        target: Option<ScopeKey>,
        kind: impl Into<String>,
        mode: DeliveryMode,
        group: Option<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            target,
            group,
            mode,
            payload,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    /// Broadcast notifications address every connected client
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    /// Addressing scope, if any
    #[must_use]
    pub fn scope(&self) -> Option<NotificationScope> {
        self.target.as_ref().map(|t| t.scope)
    }

    /// Scope identifier, if any
    #[must_use]
    pub fn scope_id(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.scope_id.as_str())
    }

    /// Client-facing JSON body: `{type, id, mode, group, ...payload}`
    ///
    /// Reserved keys take precedence over payload keys of the same name.
    #[must_use]
    pub fn to_wire(&self, timeseries_display_secs: u64) -> Value {
        let mut body = self.payload.clone();
        body.insert("type".to_owned(), Value::String(self.kind.clone()));
        body.insert("id".to_owned(), Value::String(self.id.to_string()));
        body.insert("mode".to_owned(), Value::String(self.mode.to_string()));
        body.insert(
            "group".to_owned(),
            self.group.clone().map_or(Value::Null, Value::String),
        );
        body.insert(
            "dismissible".to_owned(),
            Value::Bool(self.mode.is_dismissible() && !self.is_broadcast()),
        );
        body.insert("created_at".to_owned(), unix_timestamp(self.created_at));
        if self.mode == DeliveryMode::Timeseries {
            body.insert("expires_in".to_owned(), Value::from(timeseries_display_secs));
        }
        Value::Object(body)
    }
}

/// Seconds since the epoch with sub-second precision, matching the `since` parameter
fn unix_timestamp(at: DateTime<Utc>) -> Value {
    let secs = at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1_000_000.0;
    Value::from(secs)
}

/// Event flowing from the service to connected streams, locally or across processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A new notification
    Notify {
        /// The notification being delivered
        notification: Notification,
    },
    /// A previously delivered notification was removed
    Dismissed {
        /// Id of the removed notification
        id: Uuid,
        /// Addressee of the removed notification
        target: Option<ScopeKey>,
    },
}

impl StreamEvent {
    /// Wrap a notification for delivery
    #[must_use]
    pub const fn notify(notification: Notification) -> Self {
        Self::Notify { notification }
    }

    /// Removal of a notification addressed to `target`
    #[must_use]
    pub const fn dismissed(id: Uuid, target: Option<ScopeKey>) -> Self {
        Self::Dismissed { id, target }
    }

    /// Id of the notification this event concerns
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Notify { notification } => notification.id,
            Self::Dismissed { id, .. } => *id,
        }
    }

    /// Addressee, `None` meaning every connection
    #[must_use]
    pub const fn target(&self) -> Option<&ScopeKey> {
        match self {
            Self::Notify { notification } => notification.target.as_ref(),
            Self::Dismissed { target, .. } => target.as_ref(),
        }
    }

    /// Client-facing JSON body of the SSE `message` event
    #[must_use]
    pub fn to_wire(&self, timeseries_display_secs: u64) -> Value {
        match self {
            Self::Notify { notification } => notification.to_wire(timeseries_display_secs),
            Self::Dismissed { id, .. } => serde_json::json!({
                "type": DISMISSED_TYPE,
                "id": id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(title: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("title".to_owned(), Value::String(title.to_owned()));
        map
    }

    #[test]
    fn test_wire_body_spreads_payload() {
        let n = Notification::new(
            Some(ScopeKey::session("s1")),
            "generic",
            DeliveryMode::Queued,
            Some("deploy".to_owned()),
            payload("Saved"),
        );
        let body = n.to_wire(8);
        assert_eq!(body["type"], "generic");
        assert_eq!(body["id"], n.id.to_string());
        assert_eq!(body["mode"], "queued");
        assert_eq!(body["group"], "deploy");
        assert_eq!(body["title"], "Saved");
        assert_eq!(body["dismissible"], true);
        assert!(body.get("expires_in").is_none());
    }

    #[test]
    fn test_reserved_keys_win_over_payload() {
        let mut map = payload("x");
        map.insert("type".to_owned(), Value::String("spoofed".to_owned()));
        let n = Notification::new(None, "generic", DeliveryMode::Ephemeral, None, map);
        assert_eq!(n.to_wire(8)["type"], "generic");
        assert_eq!(n.to_wire(8)["dismissible"], false);
    }

    #[test]
    fn test_timeseries_is_marked_non_dismissible() {
        let n = Notification::new(
            Some(ScopeKey::user("u1")),
            "progress",
            DeliveryMode::Timeseries,
            None,
            Map::new(),
        );
        let body = n.to_wire(8);
        assert_eq!(body["dismissible"], false);
        assert_eq!(body["expires_in"], 8);
    }

    #[test]
    fn test_dismissed_event_body() {
        let id = Uuid::new_v4();
        let event = StreamEvent::dismissed(id, Some(ScopeKey::session("s1")));
        assert_eq!(
            event.to_wire(8),
            serde_json::json!({"type": "dismissed", "id": id.to_string()})
        );
    }

    #[test]
    fn test_mode_policies() {
        assert!(DeliveryMode::Queued.is_persisted());
        assert!(DeliveryMode::Timeseries.is_persisted());
        assert!(!DeliveryMode::Ephemeral.is_persisted());
        assert!(DeliveryMode::Queued.is_dismissible());
        assert!(!DeliveryMode::Timeseries.is_dismissible());
        assert_eq!("timeseries".parse::<DeliveryMode>(), Ok(DeliveryMode::Timeseries));
        assert!("bogus".parse::<NotificationScope>().is_err());
    }
}
