// ABOUTME: Core types and constants for the Pulse notification delivery subsystem
// ABOUTME: Foundation crate with the notification model, error handling, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![deny(unsafe_code)]

//! # Pulse Core
//!
//! Foundation crate shared by the notification service, its backends and its
//! HTTP layer. It is designed to change infrequently.
//!
//! ## Modules
//!
//! - **errors**: `AppError`, `ErrorCode` and HTTP status mapping
//! - **constants**: TTLs, intervals and connection defaults
//! - **models**: the `Notification` value type and its wire events

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants organized by domain
pub mod constants;

/// Notification model and stream event types
pub mod models;
