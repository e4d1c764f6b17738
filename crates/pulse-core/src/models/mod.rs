// ABOUTME: Core data models for the notification delivery subsystem
// ABOUTME: Re-exports the Notification value type and the stream event envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

//! # Data Models
//!
//! - `Notification`: the immutable value flowing through the whole system
//! - `ScopeKey`: a `(scope, scope_id)` address
//! - `DeliveryMode`: queued, timeseries or ephemeral lifecycle policy
//! - `StreamEvent`: what a connected stream receives (new or dismissed)

mod notification;

pub use notification::{DeliveryMode, Notification, NotificationScope, ScopeKey, StreamEvent};
