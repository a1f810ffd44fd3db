//! Configuration module for environment variable parsing.
//!
//! All configuration comes from environment variables with hardcoded
//! fallbacks, so the relay runs with no configuration at all: signature
//! verification then stays off and both destinations use the deployed
//! platform defaults.

use std::env;

use tracing::warn;
use url::Url;

/// Default destination for relayed webhook envelopes.
pub const DEFAULT_FORWARD_URL: &str =
    "https://devplataform.cashcolombia.com/webhook/zonagamer-cashconector-webhook";

/// Default CRM destination for product updates.
pub const DEFAULT_CRM_URL: &str = "https://devplataform.cashcolombia.com/webhook/shopify-gamer";

/// Default deadline for outbound forwarding calls, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Shopify API secret for webhook HMAC verification
    pub shopify_api_secret: Option<String>,

    /// Destination for relayed webhook envelopes
    pub forward_url: Url,

    /// CRM destination for product update events
    pub crm_webhook_url: Url,

    /// Deadline for the forward endpoint's outbound call, in milliseconds
    pub forward_timeout_ms: u64,

    /// Deadline for the detached CRM delivery, in milliseconds
    pub crm_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: parse_number("PORT", 8080),

            shopify_api_secret: env::var("SHOPIFY_API_SECRET").ok(),

            forward_url: parse_url("WEBHOOK_FORWARD_URL", DEFAULT_FORWARD_URL),

            crm_webhook_url: parse_url("CRM_WEBHOOK_URL", DEFAULT_CRM_URL),

            forward_timeout_ms: parse_number("FORWARD_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),

            crm_timeout_ms: parse_number("CRM_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Parse a URL from the environment, falling back to a known-good default.
fn parse_url(name: &str, default: &str) -> Url {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default_url(default),
    };

    match Url::parse(&raw) {
        Ok(url) => url,
        Err(e) => {
            warn!(env_var = name, value = %raw, error = %e, "Invalid URL, using default");
            default_url(default)
        }
    }
}

fn default_url(default: &str) -> Url {
    Url::parse(default).expect("hardcoded default URL is valid")
}

/// Parse a numeric value from the environment, falling back to a default.
fn parse_number<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(env_var = name, value = %raw, error = %e, "Invalid number, using default");
            default
        }
    }
}
