//! Web server module for receiving and relaying webhooks.
//!
//! This module provides a thin, fast web server that:
//! - Receives webhooks from Shopify
//! - Verifies the HMAC signature over the raw body
//! - Relays full envelopes to the forward URL, reflecting the outcome
//! - Acknowledges product updates immediately and delivers them to the
//!   CRM from a detached task

pub mod handlers;
pub mod signature;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use handlers::{
    forward_webhook, health, products_update_webhook, AppState, ForwardAck, ForwardRejected,
    HealthResponse, InternalError,
};
pub use signature::{
    authenticate_webhook, is_signature_verification_enabled, verify_shopify_signature, AuthError,
    VerifiedWebhook,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/forward", post(forward_webhook))
        .route("/webhooks/products/update", post(products_update_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
