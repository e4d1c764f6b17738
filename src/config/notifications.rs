// ABOUTME: Notification subsystem configuration: backend selection, TTLs, and stream pacing
// ABOUTME: Parses NOTIFICATION_* environment variables into a typed configuration
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::env_parse;
use super::redis::RedisConnectionConfig;
use pulse_core::constants::notifications as defaults;
use pulse_core::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which backend implementation stores and fans out notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local maps, no cross-process fanout
    #[default]
    Memory,
    /// Relational rows plus Redis pub/sub
    Redis,
    /// Relational rows plus `PostgreSQL` LISTEN/NOTIFY
    Postgres,
}

impl BackendKind {
    /// Durable backends persist rows and run the cleanup scheduler
    #[must_use]
    pub const fn is_durable(self) -> bool {
        !matches!(self, Self::Memory)
    }

    /// Configuration/health representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(AppError::config(format!(
                "unknown NOTIFICATION_BACKEND '{other}' (expected memory, redis or postgres)"
            ))),
        }
    }
}

/// Notification subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Selected backend
    pub backend: BackendKind,
    /// Redis URL for the broker-backed backend
    pub redis_url: Option<String>,
    /// Key prefix for the Redis pub/sub channel
    pub redis_prefix: String,
    /// Redis connection and retry settings
    pub redis_connection: RedisConnectionConfig,
    /// Per-connection delivery queue capacity
    pub queue_capacity: usize,
    /// Keepalive comment cadence in seconds
    pub keepalive_secs: u64,
    /// Cleanup scheduler tick in seconds
    pub cleanup_interval_secs: u64,
    /// Age after which queued rows are reaped
    pub queued_ttl_secs: u64,
    /// Age after which timeseries rows are reaped
    pub timeseries_ttl_secs: u64,
    /// Client-side display window for timeseries toasts, sent as `expires_in`
    pub timeseries_display_secs: u64,
    /// How many recently emitted non-durable ids are remembered
    pub recent_ephemeral_capacity: usize,
    /// Cap for the notify-channel reconnect backoff
    pub listen_max_backoff_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            redis_url: None,
            redis_prefix: defaults::REDIS_KEY_PREFIX.to_owned(),
            redis_connection: RedisConnectionConfig::default(),
            queue_capacity: defaults::CONNECTION_QUEUE_CAPACITY,
            keepalive_secs: defaults::KEEPALIVE_INTERVAL_SECS,
            cleanup_interval_secs: defaults::CLEANUP_INTERVAL_SECS,
            queued_ttl_secs: defaults::QUEUED_TTL_SECS,
            timeseries_ttl_secs: defaults::TIMESERIES_TTL_SECS,
            timeseries_display_secs: defaults::TIMESERIES_DISPLAY_SECS,
            recent_ephemeral_capacity: defaults::RECENT_EPHEMERAL_CAPACITY,
            listen_max_backoff_ms: defaults::LISTEN_MAX_BACKOFF_MS,
        }
    }
}

impl NotificationConfig {
    /// Load notification configuration from environment
    ///
    /// # Errors
    ///
    /// Returns an error if `NOTIFICATION_BACKEND` names an unknown backend
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        let backend = env::var("NOTIFICATION_BACKEND")
            .unwrap_or_default()
            .parse::<BackendKind>()?;

        Ok(Self {
            backend,
            redis_url: env::var("NOTIFICATION_REDIS_URL")
                .or_else(|_| env::var("REDIS_URL"))
                .ok()
                .filter(|url| !url.is_empty()),
            redis_prefix: env::var("NOTIFICATION_REDIS_PREFIX").unwrap_or(defaults.redis_prefix),
            redis_connection: RedisConnectionConfig::from_env(),
            queue_capacity: env_parse("NOTIFICATION_QUEUE_CAPACITY", defaults.queue_capacity)
                .max(1),
            keepalive_secs: env_parse("NOTIFICATION_KEEPALIVE_SECS", defaults.keepalive_secs)
                .max(1),
            cleanup_interval_secs: env_parse(
                "NOTIFICATION_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval_secs,
            )
            .max(1),
            queued_ttl_secs: env_parse("NOTIFICATION_QUEUED_TTL_SECS", defaults.queued_ttl_secs),
            timeseries_ttl_secs: env_parse(
                "NOTIFICATION_TIMESERIES_TTL_SECS",
                defaults.timeseries_ttl_secs,
            ),
            timeseries_display_secs: env_parse(
                "NOTIFICATION_TIMESERIES_DISPLAY_SECS",
                defaults.timeseries_display_secs,
            ),
            recent_ephemeral_capacity: env_parse(
                "NOTIFICATION_RECENT_EPHEMERAL_CAPACITY",
                defaults.recent_ephemeral_capacity,
            )
            .max(1),
            listen_max_backoff_ms: env_parse(
                "NOTIFICATION_LISTEN_MAX_BACKOFF_MS",
                defaults.listen_max_backoff_ms,
            ),
        })
    }

    /// Keepalive cadence
    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Cleanup scheduler tick
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Redis pub/sub channel name
    #[must_use]
    pub fn redis_channel(&self) -> String {
        format!("{}{}", self.redis_prefix, defaults::REDIS_CHANNEL_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::errors::ErrorCode;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("".parse::<BackendKind>().ok(), Some(BackendKind::Memory));
        assert_eq!("Redis".parse::<BackendKind>().ok(), Some(BackendKind::Redis));
        assert_eq!(
            "postgresql".parse::<BackendKind>().ok(),
            Some(BackendKind::Postgres)
        );
        let code = "myapp.backends.Custom"
            .parse::<BackendKind>()
            .err()
            .map(|e| e.code);
        assert_eq!(code, Some(ErrorCode::ConfigError));
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = NotificationConfig::default();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.keepalive_secs, 30);
        assert_eq!(config.cleanup_interval_secs, 600);
        assert_eq!(config.queued_ttl_secs, 86_400);
        assert_eq!(config.timeseries_ttl_secs, 604_800);
        assert_eq!(config.redis_channel(), "pulse:notifications");
        assert!(!config.backend.is_durable());
    }
}
