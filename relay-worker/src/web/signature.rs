//! Shopify webhook authentication.
//!
//! Shopify signs webhook requests using HMAC-SHA256 over the raw request
//! body with the app's API secret; the digest arrives base64-encoded in the
//! `X-Shopify-Hmac-Sha256` header. Topic and shop domain arrive in their
//! own headers alongside the JSON payload.
//! Reference: https://shopify.dev/docs/apps/build/webhooks/subscribe/https

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::forward::Session;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 HMAC-SHA256 digest of the raw body.
pub const HEADER_HMAC: &str = "X-Shopify-Hmac-Sha256";

/// Header carrying the webhook topic, e.g. "products/update".
pub const HEADER_TOPIC: &str = "X-Shopify-Topic";

/// Header carrying the myshopify.com domain of the originating shop.
pub const HEADER_SHOP_DOMAIN: &str = "X-Shopify-Shop-Domain";

/// Header carrying the unique delivery id.
pub const HEADER_WEBHOOK_ID: &str = "X-Shopify-Webhook-Id";

/// Why webhook authentication failed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required header is absent.
    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    /// A header is present but not readable as a string.
    #[error("header {0} is not valid UTF-8")]
    InvalidHeader(&'static str),

    /// The HMAC digest does not match the request body.
    #[error("HMAC signature mismatch")]
    InvalidSignature,

    /// The request body is not valid JSON.
    #[error("webhook payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// A webhook whose origin has been verified.
///
/// This is the contract between the authentication layer and the handlers:
/// everything in here came from a request that passed signature checks (or
/// arrived while verification was explicitly disabled).
#[derive(Debug, Clone)]
pub struct VerifiedWebhook {
    /// Webhook topic, e.g. "products/update"
    pub topic: String,
    /// myshopify.com domain of the originating shop
    pub shop: String,
    /// Parsed JSON payload
    pub payload: Value,
    /// Stored app session for the shop; always `None` for the standalone
    /// relay, which keeps no session store
    pub session: Option<Session>,
    /// Delivery id, when the platform sent one
    pub webhook_id: Option<String>,
}

/// Verify a Shopify webhook signature.
///
/// Computes HMAC-SHA256 over the raw body with the API secret and compares
/// the base64 digest against the header value in constant time.
pub fn verify_shopify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    // Check for empty inputs
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "shopify_signature_missing_fields"
        );
        return false;
    }

    // Compute expected signature: base64(HMAC-SHA256(secret, raw_body))
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("shopify_signature_invalid_key");
            return false;
        }
    };

    mac.update(body);

    let expected_signature = BASE64.encode(mac.finalize().into_bytes());

    // Constant-time comparison to prevent timing attacks
    let valid = constant_time_compare(&expected_signature, signature);

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            "shopify_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check if Shopify signature verification is enabled.
pub fn is_signature_verification_enabled(secret: &Option<String>) -> bool {
    secret.as_ref().map(|k| !k.trim().is_empty()).unwrap_or(false)
}

/// Authenticate an inbound webhook request.
///
/// When a secret is configured, the HMAC header must be present and match
/// the raw body. Topic and shop headers are required either way, and the
/// body must parse as JSON.
///
/// # Errors
///
/// Returns [`AuthError`] when the signature is missing or wrong, when the
/// topic or shop header is absent, or when the body is not valid JSON.
pub fn authenticate_webhook(
    secret: &Option<String>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<VerifiedWebhook, AuthError> {
    if is_signature_verification_enabled(secret) {
        let key = secret.as_deref().unwrap_or_default();
        let signature = required_header(headers, HEADER_HMAC)?;

        if !verify_shopify_signature(key, body, signature) {
            return Err(AuthError::InvalidSignature);
        }
    } else {
        warn!("shopify_signature_verification_disabled");
    }

    let topic = required_header(headers, HEADER_TOPIC)?.to_string();
    let shop = required_header(headers, HEADER_SHOP_DOMAIN)?.to_string();
    let webhook_id = optional_header(headers, HEADER_WEBHOOK_ID);

    let payload: Value = serde_json::from_slice(body)?;

    Ok(VerifiedWebhook {
        topic,
        shop,
        payload,
        // Webhook deliveries carry no session; a deployment with a session
        // store would attach the shop's offline session here
        session: None,
        webhook_id,
    })
}

fn required_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .ok_or(AuthError::MissingHeader(name))?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader(name))
}

fn optional_header(headers: &HeaderMap, name: &'static str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
