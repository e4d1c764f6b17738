// ABOUTME: Application constants organized by domain
// ABOUTME: Default TTLs, intervals, queue sizes, and Redis retry settings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

/// Notification lifecycle and streaming defaults
pub mod notifications;

/// Redis connection and retry defaults
pub mod redis;

/// Service identification for structured logging
pub mod service_names {
    /// Name reported by the server binary
    pub const PULSE_NOTIFY_SERVER: &str = "pulse-notify-server";
}

/// Network defaults
pub mod network {
    /// HTTP port the server binds when `HTTP_PORT` is unset
    pub const DEFAULT_HTTP_PORT: u16 = 8081;
    /// Bind address for the HTTP listener
    pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
    /// Maximum pooled database connections
    pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
}
