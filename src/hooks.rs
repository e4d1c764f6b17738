// ABOUTME: Extensibility interface consulted before delivery and informed after send or dismiss
// ABOUTME: Hook failures and panics are isolated from notification persistence and delivery
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use async_trait::async_trait;
use futures_util::FutureExt;
use pulse_core::errors::AppResult;
use pulse_core::models::{Notification, StreamEvent};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of the before-send checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookDecision {
    /// Store and deliver as usual
    #[default]
    Allow,
    /// Drop the notification without storing or delivering it
    Suppress,
}

/// Host application call-outs around notification delivery
#[async_trait]
pub trait NotificationHooks: Send + Sync {
    /// Veto checkpoint, awaited before anything is stored or delivered
    ///
    /// # Errors
    ///
    /// An error is logged and treated as [`HookDecision::Allow`]
    async fn before_send(&self, _notification: &Notification) -> AppResult<HookDecision> {
        Ok(HookDecision::Allow)
    }

    /// Fired after a notification was sent or dismissed; runs detached from the caller
    ///
    /// # Errors
    ///
    /// An error is logged and otherwise ignored
    async fn after(&self, _event: StreamEvent) -> AppResult<()> {
        Ok(())
    }
}

/// Hooks that allow everything and observe nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl NotificationHooks for NoopHooks {}

/// Run the before-send checkpoint, falling back to `Allow` on error or panic
pub(crate) async fn run_before_send(
    hooks: &dyn NotificationHooks,
    notification: &Notification,
) -> HookDecision {
    match AssertUnwindSafe(hooks.before_send(notification))
        .catch_unwind()
        .await
    {
        Ok(Ok(decision)) => decision,
        Ok(Err(e)) => {
            warn!(id = %notification.id, error = %e, "before_send hook failed, delivering anyway");
            HookDecision::Allow
        }
        Err(_) => {
            warn!(id = %notification.id, "before_send hook panicked, delivering anyway");
            HookDecision::Allow
        }
    }
}

/// Spawn the after hook without waiting for it
pub(crate) fn spawn_after(hooks: Arc<dyn NotificationHooks>, event: StreamEvent) {
    let id = event.id();
    tokio::spawn(async move {
        match hooks.after(event).await {
            Ok(()) => debug!(%id, "after hook completed"),
            Err(e) => warn!(%id, error = %e, "after hook failed"),
        }
    });
}
