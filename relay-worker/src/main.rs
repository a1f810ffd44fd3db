//! CashConector Web Server - Shopify webhook relay.
//!
//! This binary provides a thin, fast web server that:
//! - Receives webhooks from Shopify
//! - Verifies the HMAC signature over the raw body
//! - Relays full envelopes to the forward URL, reflecting the outcome
//! - Acknowledges product updates immediately and delivers them to the
//!   CRM from a detached task
//!
//! Delivery failures on the detached path are logged and swallowed; the
//! upstream platform owns redelivery.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cashconector::web::{is_signature_verification_enabled, router, AppState};
use cashconector::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        signature_verification_enabled =
            is_signature_verification_enabled(&config.shopify_api_secret),
        forward_url = %config.forward_url,
        crm_webhook_url = %config.crm_webhook_url,
        forward_timeout_ms = config.forward_timeout_ms,
        crm_timeout_ms = config.crm_timeout_ms,
        "config_loaded"
    );

    // Shared HTTP client for all outbound forwarding
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(100)
        .build()
        .context("Failed to create HTTP client")?;

    // Create application state and router
    let port = config.port;
    let state = AppState::new(config, http);
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
