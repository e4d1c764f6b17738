// ABOUTME: Process lifecycle wiring for the notification subsystem
// ABOUTME: Builds the configured backend and service, starts them, and stops them on shutdown signals
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Startup and shutdown ordering
//!
//! Startup: backend connections, then the service (listeners, remote
//! dispatcher, cleanup scheduler). Shutdown runs in reverse once the HTTP
//! server has drained.

use crate::backends::Backend;
use crate::config::ServerConfig;
use crate::hooks::{NoopHooks, NotificationHooks};
use crate::routes;
use crate::service::NotificationService;
use axum::Router;
use pulse_core::errors::AppResult;
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::timeout;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A started notification service
pub struct NotificationRuntime {
    service: Arc<NotificationService>,
}

impl NotificationRuntime {
    /// Connect the configured backend and start the service with no-op hooks
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or fails to start
    pub async fn start(config: &ServerConfig) -> AppResult<Self> {
        Self::start_with_hooks(config, Arc::new(NoopHooks)).await
    }

    /// Connect the configured backend and start the service with `hooks`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or fails to start
    pub async fn start_with_hooks(
        config: &ServerConfig,
        hooks: Arc<dyn NotificationHooks>,
    ) -> AppResult<Self> {
        let backend = Backend::from_config(config).await?;
        info!("Notification backend ready: {}", backend.backend_info());

        let service = Arc::new(NotificationService::with_hooks(
            backend,
            config.notifications.clone(),
            hooks,
        ));
        service.start().await?;
        Ok(Self { service })
    }

    /// The running service
    #[must_use]
    pub const fn service(&self) -> &Arc<NotificationService> {
        &self.service
    }

    /// HTTP router over this runtime's service
    #[must_use]
    pub fn router(&self) -> Router {
        routes::router(Arc::clone(&self.service))
    }

    /// Wrap `signal` so open notification streams end as soon as it fires
    ///
    /// SSE responses never finish on their own, so the HTTP server's graceful
    /// drain would otherwise wait on every connected client.
    pub fn graceful_shutdown<F>(&self, signal: F) -> impl Future<Output = ()> + Send + 'static
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::clone(self.service.registry());
        async move {
            signal.await;
            let closed = registry.close_all();
            info!(closed, "Closed open notification streams for shutdown");
        }
    }

    /// Stop the service, bounded by a timeout
    pub async fn shutdown(self) {
        info!("Shutting down notification service");
        match timeout(SHUTDOWN_TIMEOUT, self.service.stop()).await {
            Ok(Ok(())) => info!("Notification service shut down cleanly"),
            Ok(Err(e)) => error!(error = %e, "Notification service shutdown error"),
            Err(_) => warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Notification service shutdown timed out"
            ),
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
