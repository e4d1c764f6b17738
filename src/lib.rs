// ABOUTME: Library entry point for the pulse real-time notification subsystem
// ABOUTME: Scoped notifications with pluggable storage and fanout, streamed to browsers over SSE
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![deny(unsafe_code)]

//! # Pulse Notify
//!
//! Producers anywhere in request handling code emit typed notifications
//! addressed to a session, a user, or every connected client. Connected
//! browsers receive them over a Server-Sent Events stream with replay on
//! reconnect for durable modes.
//!
//! ## Architecture
//!
//! - **Backends**: storage and cross-process fanout (in-memory, `PostgreSQL`
//!   rows with Redis pub/sub, `PostgreSQL` rows with LISTEN/NOTIFY)
//! - **Service**: the facade producers call; group-key replacement and mode policy
//! - **Registry**: live connections of this process
//! - **Stream**: the flush, sync, live protocol for one connection
//! - **Cleanup**: TTL reaper for durable backends
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use pulse_notify::backends::memory::InMemoryBackend;
//! use pulse_notify::config::NotificationConfig;
//! use pulse_notify::service::NotificationService;
//! use pulse_core::models::DeliveryMode;
//! use serde_json::{json, Map};
//!
//! # async fn run() -> pulse_core::errors::AppResult<()> {
//! let service = NotificationService::new(InMemoryBackend::new(), NotificationConfig::default());
//! let mut payload = Map::new();
//! payload.insert("title".to_owned(), json!("Saved"));
//! service
//!     .notify_session("s1", "generic", DeliveryMode::Queued, None, payload)
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Storage and fanout backends
pub mod backends;

/// TTL reaper for stored notifications
pub mod cleanup;

/// Environment-driven configuration
pub mod config;

/// Before-send and after-delivery call-outs
pub mod hooks;

/// Startup and shutdown wiring
pub mod lifecycle;

/// Structured logging setup
pub mod logging;

/// Live connection registry
pub mod registry;

/// HTTP endpoints
pub mod routes;

/// Notification Service facade
pub mod service;

/// Per-connection stream protocol
pub mod stream;
