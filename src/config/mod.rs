// ABOUTME: Configuration management module for server and notification settings
// ABOUTME: Environment-only configuration with typed defaults from pulse-core constants
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Configuration module
//!
//! - **Environment**: server configuration from environment variables
//! - **Notifications**: backend selection, TTLs and stream pacing
//! - **Redis**: broker connection and retry settings

use std::env;
use std::str::FromStr;

/// Environment and server configuration
pub mod environment;
/// Notification subsystem configuration
pub mod notifications;
/// Redis connection configuration
pub mod redis;

pub use environment::ServerConfig;
pub use notifications::{BackendKind, NotificationConfig};
pub use redis::RedisConnectionConfig;

/// Parse an environment variable, falling back to `default` when unset or malformed
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
