// ABOUTME: HTTP route assembly for the notification server
// ABOUTME: Merges the notification stream, dismiss, and health routers behind shared middleware
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Route modules
//!
//! Each module exposes a `*Routes` unit struct with a `routes()` constructor
//! returning an axum [`Router`] with its state already applied.

/// Health check endpoint
pub mod health;
/// Caller identity extraction from headers and cookies
pub mod identity;
/// Notification stream and dismiss endpoints
pub mod notifications;

pub use health::HealthRoutes;
pub use identity::CallerIdentity;
pub use notifications::NotificationRoutes;

use crate::service::NotificationService;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Every route the server exposes
#[must_use]
pub fn router(service: Arc<NotificationService>) -> Router {
    Router::new()
        .merge(NotificationRoutes::routes(Arc::clone(&service)))
        .merge(HealthRoutes::routes(service))
        .layer(TraceLayer::new_for_http())
}
