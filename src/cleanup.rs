// ABOUTME: Periodic reaper deleting stored notifications whose mode-specific TTL has elapsed
// ABOUTME: Failed sweeps are logged and retried on the next tick without stopping the loop
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::backends::NotificationBackend;
use crate::config::NotificationConfig;
use chrono::{DateTime, TimeDelta, Utc};
use pulse_core::errors::{AppError, AppResult};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Deletes queued and timeseries rows older than their TTLs
pub struct CleanupScheduler<B> {
    backend: B,
    interval: Duration,
    queued_ttl: Duration,
    timeseries_ttl: Duration,
}

impl<B: NotificationBackend + 'static> CleanupScheduler<B> {
    /// Scheduler over `backend` using the configured interval and mode TTLs
    #[must_use]
    pub fn new(backend: B, config: &NotificationConfig) -> Self {
        Self {
            backend,
            interval: config.cleanup_interval(),
            queued_ttl: Duration::from_secs(config.queued_ttl_secs),
            timeseries_ttl: Duration::from_secs(config.timeseries_ttl_secs),
        }
    }

    /// Run one sweep as if the current time were `now`
    ///
    /// # Errors
    ///
    /// Returns an error if a TTL is out of range or the backend delete fails
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let queued_before = cutoff(now, self.queued_ttl, "queued")?;
        let timeseries_before = cutoff(now, self.timeseries_ttl, "timeseries")?;

        let purged = self
            .backend
            .purge_expired(queued_before, timeseries_before)
            .await?;
        if purged > 0 {
            info!(purged, "Purged expired notifications");
        } else {
            debug!("No expired notifications to purge");
        }
        Ok(purged)
    }

    /// Start the periodic loop; it exits when `shutdown` flips to true
    #[must_use]
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_secs = self.interval.as_secs(),
                backend = %self.backend.kind(),
                "Notification cleanup scheduler started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_at(Utc::now()).await {
                            error!(error = %e, "Notification cleanup failed, retrying next tick");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("Notification cleanup scheduler received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}

fn cutoff(now: DateTime<Utc>, ttl: Duration, mode: &str) -> AppResult<DateTime<Utc>> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .ok_or_else(|| AppError::config(format!("{mode} TTL of {}s is out of range", ttl.as_secs())))
}
