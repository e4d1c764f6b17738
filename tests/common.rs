// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides service construction, payload building, and live event helpers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
//! Shared test utilities for `pulse_notify`

use anyhow::{anyhow, Result};
use pulse_core::models::StreamEvent;
use pulse_notify::backends::memory::InMemoryBackend;
use pulse_notify::config::NotificationConfig;
use pulse_notify::registry::Connection;
use pulse_notify::service::NotificationService;
use serde_json::{Map, Value};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::time::timeout;

static INIT_LOGGER: Once = Once::new();

/// How long a test waits for an event it expects
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a test waits before concluding no event is coming
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Notification service over a fresh in-memory backend
pub fn create_test_service() -> Arc<NotificationService> {
    create_test_service_with_config(NotificationConfig::default())
}

pub fn create_test_service_with_config(config: NotificationConfig) -> Arc<NotificationService> {
    init_test_logging();
    Arc::new(NotificationService::new(InMemoryBackend::new(), config))
}

/// Build a payload map from string pairs
pub fn payload(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), Value::String((*value).to_owned())))
        .collect()
}

/// Next event on a live connection, failing after `EVENT_TIMEOUT`
pub async fn next_event(connection: &mut Connection) -> Result<StreamEvent> {
    timeout(EVENT_TIMEOUT, connection.recv())
        .await
        .map_err(|_| anyhow!("timed out waiting for a notification event"))?
        .map_err(|e| anyhow!("connection receive failed: {e}"))
}

/// Whether the connection stays silent for `QUIET_PERIOD`
pub async fn is_quiet(connection: &mut Connection) -> bool {
    timeout(QUIET_PERIOD, connection.recv()).await.is_err()
}
