// ABOUTME: Health check route reporting backend reachability and live connection count
// ABOUTME: Returns 503 when the backend store or transport fails its health check
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::backends::NotificationBackend;
use crate::service::NotificationService;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: &'static str,
    /// Backend kind
    pub backend: &'static str,
    /// Human-readable backend description
    pub backend_info: &'static str,
    /// Whether the backend health check succeeded
    pub backend_healthy: bool,
    /// Health check failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_error: Option<String>,
    /// Open streams in this process
    pub active_connections: usize,
    /// This process's publish origin id
    pub instance_id: String,
    /// RFC 3339 time of the check
    pub timestamp: String,
}

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check route
    pub fn routes(service: Arc<NotificationService>) -> Router {
        Router::new()
            .route("/health", get(Self::health))
            .with_state(service)
    }

    async fn health(
        State(service): State<Arc<NotificationService>>,
    ) -> (StatusCode, Json<HealthResponse>) {
        let backend = service.backend();
        let check = backend.health_check().await;
        if let Err(e) = &check {
            warn!(error = %e, "Notification backend health check failed");
        }

        let status = if check.is_ok() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let body = HealthResponse {
            status: if check.is_ok() { "healthy" } else { "degraded" },
            backend: backend.kind().as_str(),
            backend_info: backend.backend_info(),
            backend_healthy: check.is_ok(),
            backend_error: check.err().map(|e| e.to_string()),
            active_connections: service.registry().active_connections(),
            instance_id: service.instance_id().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body))
    }
}
