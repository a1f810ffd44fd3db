//! Outbound envelope types for the two forwarding paths.
//!
//! This module defines the JSON bodies sent downstream:
//! - `RelayEnvelope`: full webhook envelope re-POSTed by the relay endpoint
//! - `CrmEnvelope`: product event format expected by the CRM
//!
//! Field names follow the wire format the downstream platform consumes
//! (camelCase where the receiver expects it).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

// =============================================================================
// Session
// =============================================================================

/// App session attached to a relayed webhook.
///
/// Webhook deliveries themselves carry no session. A standalone relay keeps
/// no session store and always forwards `null`, but the downstream contract
/// includes the field either way, so the shape is kept here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier
    pub id: String,
    /// Shop domain the session belongs to
    pub shop: String,
    /// Whether this is an online (per-user) session
    pub is_online: bool,
}

// =============================================================================
// Relay Envelope (forward endpoint)
// =============================================================================

/// Envelope re-POSTed to the forward URL.
///
/// Wraps the verified webhook verbatim along with receipt metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    /// Webhook topic, e.g. "products/update"
    pub topic: String,
    /// Shop domain the webhook came from
    pub shop: String,
    /// Raw webhook payload exactly as delivered
    pub payload: Value,
    /// Stored app session for the shop, if any
    pub session: Option<Session>,
    /// When this relay received the webhook
    pub received_at: DateTime<Utc>,
}

impl RelayEnvelope {
    /// Create an envelope stamped with the current time.
    pub fn new(topic: String, shop: String, payload: Value, session: Option<Session>) -> Self {
        Self {
            topic,
            shop,
            payload,
            session,
            received_at: Utc::now(),
        }
    }
}

// =============================================================================
// CRM Envelope (products/update endpoint)
// =============================================================================

/// Product event sent to the CRM.
#[derive(Debug, Clone, Serialize)]
pub struct CrmEnvelope {
    /// Shop domain the webhook came from
    pub shop: String,
    /// Webhook topic, e.g. "products/update"
    pub event: String,
    /// Raw product payload exactly as delivered
    pub product: Value,
    /// When this relay received the webhook
    pub timestamp: DateTime<Utc>,
}

impl CrmEnvelope {
    /// Create an envelope stamped with the current time.
    pub fn new(shop: String, event: String, product: Value) -> Self {
        Self {
            shop,
            event,
            product,
            timestamp: Utc::now(),
        }
    }
}
