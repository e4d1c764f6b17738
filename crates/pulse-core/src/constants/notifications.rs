// ABOUTME: Notification lifecycle constants for TTLs, reaper cadence, and stream pacing
// ABOUTME: Defaults applied when the corresponding environment variables are absent
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

/// Reserved notification type signalling removal to listeners
pub const DISMISSED_TYPE: &str = "dismissed";

/// Queued notifications are reaped after this age (24 hours)
pub const QUEUED_TTL_SECS: u64 = 86_400;

/// Timeseries notifications are reaped after this age (7 days)
pub const TIMESERIES_TTL_SECS: u64 = 604_800;

/// How long clients display a timeseries toast before expiring it locally
pub const TIMESERIES_DISPLAY_SECS: u64 = 8;

/// Cleanup scheduler tick (10 minutes)
pub const CLEANUP_INTERVAL_SECS: u64 = 600;

/// Comment-only keepalive cadence on idle streams
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// Per-connection delivery queue capacity
pub const CONNECTION_QUEUE_CAPACITY: usize = 256;

/// Remote message fan-in buffer between the backend listener and the registry
pub const REMOTE_CHANNEL_CAPACITY: usize = 1_024;

/// Number of recently emitted ephemeral ids remembered for dismiss checks
pub const RECENT_EPHEMERAL_CAPACITY: usize = 1_024;

/// Upper bound for the notify-channel reconnect backoff
pub const LISTEN_MAX_BACKOFF_MS: u64 = 30_000;

/// First notify-channel reconnect delay
pub const LISTEN_INITIAL_BACKOFF_MS: u64 = 250;

/// `PostgreSQL` LISTEN/NOTIFY channel name
pub const PG_NOTIFY_CHANNEL: &str = "pulse_notifications";

/// `PostgreSQL` NOTIFY payloads larger than this are rejected by the server
pub const PG_NOTIFY_MAX_PAYLOAD_BYTES: usize = 7_999;

/// Default Redis key prefix for the pub/sub channel
pub const REDIS_KEY_PREFIX: &str = "pulse:";

/// Redis pub/sub channel suffix appended to the key prefix
pub const REDIS_CHANNEL_SUFFIX: &str = "notifications";
