//! CashConector - Shopify webhook relay for the CashColombia platform.
//!
//! This library backs the `cashconector-web` binary: a thin web server
//! that authenticates inbound Shopify webhooks and forwards them to the
//! platform backends.
//!
//! ## Architecture
//!
//! ```text
//! Shopify → Web Server ┬→ /webhooks/forward         → forward URL (awaited, outcome reflected)
//!                      └→ /webhooks/products/update → CRM URL (detached, logged only)
//! ```

pub mod config;
pub mod forward;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use forward::{CrmEnvelope, ForwardError, RelayEnvelope, Session};
pub use web::{AppState, AuthError, VerifiedWebhook};
