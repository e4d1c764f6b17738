// ABOUTME: Server configuration assembled from environment variables
// ABOUTME: Combines HTTP, database, and notification settings with startup validation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Environment-based configuration management for deployment

use super::env_parse;
use super::notifications::{BackendKind, NotificationConfig};
use anyhow::{bail, Result};
use pulse_core::constants::network;
use std::env;
use tracing::info;

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listener port
    pub http_port: u16,
    /// Relational store connection string shared with the host application
    pub database_url: Option<String>,
    /// Maximum pooled database connections
    pub database_max_connections: u32,
    /// Notification subsystem settings
    pub notifications: NotificationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: network::DEFAULT_HTTP_PORT,
            database_url: None,
            database_max_connections: network::DEFAULT_DB_MAX_CONNECTIONS,
            notifications: NotificationConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let config = Self {
            http_port: env_parse("HTTP_PORT", network::DEFAULT_HTTP_PORT),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                network::DEFAULT_DB_MAX_CONNECTIONS,
            ),
            notifications: NotificationConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field requirements
    ///
    /// # Errors
    ///
    /// Returns an error if the selected backend lacks the connection it needs
    pub fn validate(&self) -> Result<()> {
        let backend = self.notifications.backend;

        if backend.is_durable() && self.database_url.is_none() {
            bail!("NOTIFICATION_BACKEND={backend} requires DATABASE_URL");
        }

        if backend == BackendKind::Redis && self.notifications.redis_url.is_none() {
            bail!("NOTIFICATION_BACKEND=redis requires NOTIFICATION_REDIS_URL or REDIS_URL");
        }

        Ok(())
    }

    /// Get a summary of the configuration for logging (without secrets)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Pulse Notification Server Configuration:\n\
             - HTTP Port: {}\n\
             - Backend: {}\n\
             - Database: {}\n\
             - Redis: {}\n\
             - Queue Capacity: {}\n\
             - Cleanup Interval: {}s",
            self.http_port,
            self.notifications.backend,
            if self.database_url.is_some() {
                "Configured"
            } else {
                "Not configured"
            },
            if self.notifications.redis_url.is_some() {
                "Configured"
            } else {
                "Not configured"
            },
            self.notifications.queue_capacity,
            self.notifications.cleanup_interval_secs,
        )
    }
}
