// ABOUTME: Tracing subscriber setup for the notification server
// ABOUTME: Reads filter, output format, and service identity from the environment
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Structured logging
//!
//! `RUST_LOG` picks the filter (default `info`), `LOG_FORMAT` the output
//! (`json`, `compact` or `pretty`; json by default in production), and
//! `SERVICE_NAME` / `ENVIRONMENT` label the startup line.

use anyhow::Result;
use pulse_core::constants::service_names;
use std::env;
use std::io;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Chatty dependencies held back regardless of `RUST_LOG`
const QUIET_DEPENDENCIES: &[&str] = &[
    "hyper=warn",
    "sqlx::query=warn",
    "sqlx=info",
    "redis=info",
    "tower_http=info",
];

const PRODUCTION: &str = "production";

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Full human-readable lines
    Pretty,
    /// Single-line output without targets
    Compact,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value, `None` when unrecognized
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Subscriber settings resolved from the environment
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directives supplied by the operator
    pub filter: String,
    /// Output rendering
    pub format: LogFormat,
    /// Reported on the startup line
    pub service_name: String,
    /// Deployment environment, e.g. `development` or `production`
    pub environment: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            format: LogFormat::Pretty,
            service_name: service_names::PULSE_NOTIFY_SERVER.to_owned(),
            environment: "development".to_owned(),
        }
    }
}

impl LoggingConfig {
    /// Read `RUST_LOG`, `LOG_FORMAT`, `SERVICE_NAME` and `ENVIRONMENT`
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let environment = env::var("ENVIRONMENT").unwrap_or(defaults.environment);
        let format = env::var("LOG_FORMAT")
            .ok()
            .and_then(|value| LogFormat::parse(&value))
            .unwrap_or(if environment == PRODUCTION {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            });

        Self {
            filter: env::var("RUST_LOG")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.filter),
            format,
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            environment,
        }
    }

    /// Dependency quieting first, so operator directives for the same target win
    fn directives(&self) -> String {
        let mut directives = QUIET_DEPENDENCIES.join(",");
        directives.push(',');
        directives.push_str(&self.filter);
        directives
    }

    /// Install the global subscriber
    ///
    /// # Errors
    ///
    /// Returns an error if the filter does not parse or a subscriber is already installed
    pub fn init(&self) -> Result<()> {
        let filter = EnvFilter::try_new(self.directives())?;
        let output = match self.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout)
                .boxed(),
            LogFormat::Pretty => fmt::layer().with_writer(io::stdout).boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(io::stdout)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(output)
            .try_init()?;

        info!(
            service = %self.service_name,
            environment = %self.environment,
            format = ?self.format,
            "Logging initialized"
        );
        Ok(())
    }
}

/// Install the global subscriber from environment settings
///
/// # Errors
///
/// Returns an error if the subscriber cannot be installed
pub fn init_from_env() -> Result<()> {
    LoggingConfig::from_env().init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" Compact "), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_operator_filter_follows_dependency_quieting() {
        let config = LoggingConfig {
            filter: "pulse_notify=debug".to_owned(),
            ..LoggingConfig::default()
        };
        let directives = config.directives();
        assert!(directives.starts_with("hyper=warn,"));
        assert!(directives.ends_with(",pulse_notify=debug"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
