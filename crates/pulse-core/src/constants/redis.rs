// ABOUTME: Redis connection constants for timeouts and retry behaviour
// ABOUTME: Used by the broker-backed notification backend
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Response timeout in seconds
pub const RESPONSE_TIMEOUT_SECS: u64 = 3;

/// Reconnection retries after a dropped connection
pub const RECONNECTION_RETRIES: usize = 6;

/// Exponential backoff base
pub const RETRY_EXPONENT_BASE: u64 = 2;

/// Maximum retry delay in milliseconds
pub const MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Retries for the initial connection at startup
pub const INITIAL_CONNECTION_RETRIES: u32 = 3;

/// Initial retry delay in milliseconds
pub const INITIAL_RETRY_DELAY_MS: u64 = 500;
