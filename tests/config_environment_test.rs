// ABOUTME: Tests for environment-driven server and notification configuration
// ABOUTME: Mutates process environment variables, so every test runs serially
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use pulse_core::errors::ErrorCode;
use pulse_notify::config::{BackendKind, NotificationConfig, ServerConfig};
use serial_test::serial;
use std::env;

const VARS: &[&str] = &[
    "HTTP_PORT",
    "DATABASE_URL",
    "REDIS_URL",
    "NOTIFICATION_BACKEND",
    "NOTIFICATION_REDIS_URL",
    "NOTIFICATION_REDIS_PREFIX",
    "NOTIFICATION_QUEUE_CAPACITY",
    "NOTIFICATION_KEEPALIVE_SECS",
    "NOTIFICATION_QUEUED_TTL_SECS",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_empty_environment_selects_memory_backend() {
    clear_env();
    let config = ServerConfig::from_env().expect("defaults are valid");
    assert_eq!(config.http_port, 8081);
    assert_eq!(config.notifications.backend, BackendKind::Memory);
    assert!(config.database_url.is_none());
}

#[test]
#[serial]
fn test_notification_settings_from_env() {
    clear_env();
    env::set_var("NOTIFICATION_REDIS_PREFIX", "app:");
    env::set_var("NOTIFICATION_QUEUE_CAPACITY", "32");
    env::set_var("NOTIFICATION_KEEPALIVE_SECS", "0");
    env::set_var("NOTIFICATION_QUEUED_TTL_SECS", "not-a-number");

    let config = NotificationConfig::from_env().expect("valid");
    assert_eq!(config.redis_channel(), "app:notifications");
    assert_eq!(config.queue_capacity, 32);
    assert_eq!(config.keepalive_secs, 1);
    assert_eq!(config.queued_ttl_secs, 86_400);
    clear_env();
}

#[test]
#[serial]
fn test_redis_url_falls_back_to_shared_variable() {
    clear_env();
    env::set_var("REDIS_URL", "redis://shared:6379");
    assert_eq!(
        NotificationConfig::from_env().expect("valid").redis_url.as_deref(),
        Some("redis://shared:6379")
    );

    env::set_var("NOTIFICATION_REDIS_URL", "redis://dedicated:6379");
    assert_eq!(
        NotificationConfig::from_env().expect("valid").redis_url.as_deref(),
        Some("redis://dedicated:6379")
    );
    clear_env();
}

#[test]
#[serial]
fn test_unknown_backend_is_config_error() {
    clear_env();
    env::set_var("NOTIFICATION_BACKEND", "myapp.notifications.CustomBackend");
    let err = NotificationConfig::from_env().expect_err("unknown backend");
    assert_eq!(err.code, ErrorCode::ConfigError);
    assert!(ServerConfig::from_env().is_err());
    clear_env();
}

#[test]
#[serial]
fn test_durable_backend_validation() {
    clear_env();
    env::set_var("NOTIFICATION_BACKEND", "postgres");
    assert!(ServerConfig::from_env().is_err());

    env::set_var("DATABASE_URL", "postgres://localhost/pulse");
    let config = ServerConfig::from_env().expect("database configured");
    assert_eq!(config.notifications.backend, BackendKind::Postgres);

    env::set_var("NOTIFICATION_BACKEND", "redis");
    assert!(ServerConfig::from_env().is_err());
    env::set_var("REDIS_URL", "redis://127.0.0.1:6379");
    assert!(ServerConfig::from_env().is_ok());
    clear_env();
}
