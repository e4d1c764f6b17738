// ABOUTME: Notification server binary serving the SSE stream, dismiss, and health endpoints
// ABOUTME: Loads configuration from the environment and shuts down gracefully on Ctrl-C or SIGTERM
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Pulse Notify Server
//!
//! Standalone host for the notification subsystem. In a larger application
//! the same [`NotificationRuntime`] is embedded and its router merged into
//! the host router.

use anyhow::Result;
use clap::Parser;
use pulse_core::constants::network::DEFAULT_BIND_HOST;
use pulse_notify::{
    config::ServerConfig,
    lifecycle::{shutdown_signal, NotificationRuntime},
    logging,
};
use tokio::net::TcpListener;
use tracing::info;

/// Command-line arguments
#[derive(Parser)]
#[command(name = "pulse-notify-server")]
#[command(about = "Real-time notification delivery over Server-Sent Events")]
pub struct Args {
    /// Override HTTP port
    #[arg(long, env = "HTTP_PORT")]
    http_port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "BIND_HOST", default_value = DEFAULT_BIND_HOST)]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    info!("Starting pulse notification server");
    info!("{}", config.summary());

    let runtime = NotificationRuntime::start(&config).await?;
    let app = runtime.router();

    let listener = TcpListener::bind((args.host.as_str(), config.http_port)).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    info!("   Stream:          GET    /notifications/stream[?since=<unix_timestamp>]");
    info!("   Dismiss:         DELETE /notifications/{{id}}");
    info!("   Dismiss group:   DELETE /notifications/group/{{group}}");
    info!("   Health:          GET    /health");

    axum::serve(listener, app)
        .with_graceful_shutdown(runtime.graceful_shutdown(shutdown_signal()))
        .await?;

    runtime.shutdown().await;
    Ok(())
}
