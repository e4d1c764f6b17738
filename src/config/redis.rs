// ABOUTME: Redis connection and retry configuration for the broker-backed backend
// ABOUTME: Loaded from REDIS_* environment variables with constant defaults
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use pulse_core::constants::redis;
use super::env_parse;
use serde::{Deserialize, Serialize};

/// Redis connection and retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConnectionConfig {
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Response/command timeout in seconds
    pub response_timeout_secs: u64,
    /// Number of reconnection retries after connection drop
    pub reconnection_retries: usize,
    /// Exponential backoff base for retry delays
    pub retry_exponent_base: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Number of retries for initial connection at startup
    pub initial_connection_retries: u32,
    /// Initial retry delay in milliseconds (doubles with exponential backoff)
    pub initial_retry_delay_ms: u64,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: redis::CONNECTION_TIMEOUT_SECS,
            response_timeout_secs: redis::RESPONSE_TIMEOUT_SECS,
            reconnection_retries: redis::RECONNECTION_RETRIES,
            retry_exponent_base: redis::RETRY_EXPONENT_BASE,
            max_retry_delay_ms: redis::MAX_RETRY_DELAY_MS,
            initial_connection_retries: redis::INITIAL_CONNECTION_RETRIES,
            initial_retry_delay_ms: redis::INITIAL_RETRY_DELAY_MS,
        }
    }
}

impl RedisConnectionConfig {
    /// Load Redis connection configuration from environment
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connection_timeout_secs: env_parse(
                "REDIS_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout_secs,
            ),
            response_timeout_secs: env_parse(
                "REDIS_RESPONSE_TIMEOUT_SECS",
                defaults.response_timeout_secs,
            ),
            reconnection_retries: env_parse(
                "REDIS_RECONNECTION_RETRIES",
                defaults.reconnection_retries,
            ),
            retry_exponent_base: env_parse("REDIS_RETRY_EXPONENT_BASE", defaults.retry_exponent_base),
            max_retry_delay_ms: env_parse("REDIS_MAX_RETRY_DELAY_MS", defaults.max_retry_delay_ms),
            initial_connection_retries: env_parse(
                "REDIS_INITIAL_CONNECTION_RETRIES",
                defaults.initial_connection_retries,
            ),
            initial_retry_delay_ms: env_parse(
                "REDIS_INITIAL_RETRY_DELAY_MS",
                defaults.initial_retry_delay_ms,
            ),
        }
    }

    /// Delay before the given (zero-based) initial connection retry, capped at the maximum
    #[must_use]
    pub fn retry_delay_ms(&self, attempt: u32) -> u64 {
        self.initial_retry_delay_ms
            .saturating_mul(self.retry_exponent_base.saturating_pow(attempt))
            .min(self.max_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = RedisConnectionConfig::default();
        assert_eq!(config.retry_delay_ms(0), 500);
        assert_eq!(config.retry_delay_ms(1), 1_000);
        assert_eq!(config.retry_delay_ms(2), 2_000);
        assert_eq!(config.retry_delay_ms(10), config.max_retry_delay_ms);
    }
}
