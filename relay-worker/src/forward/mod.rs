//! Webhook forwarding module.
//!
//! This module owns the two outbound paths:
//!
//! ```text
//! VerifiedWebhook -> RelayEnvelope -> relay::forward_envelope() -> forward URL
//! VerifiedWebhook -> CrmEnvelope   -> crm::send_to_crm()        -> CRM URL
//! ```
//!
//! Both paths issue a single POST bounded by an explicit deadline and never
//! retry; the upstream platform owns redelivery.

pub mod crm;
pub mod relay;
pub mod types;

use thiserror::Error;

pub use crm::send_to_crm;
pub use relay::forward_envelope;
pub use types::{CrmEnvelope, RelayEnvelope, Session};

/// Why an outbound forward failed.
///
/// A destination answering with a non-success status stays separate from
/// transport-level failures because the relay endpoint reflects the former
/// as 502 and the latter as 500.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The destination answered with a non-success HTTP status.
    #[error("destination returned {status} {status_text}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase for the status
        status_text: String,
        /// Response body text, captured best effort
        body: String,
    },

    /// The request was aborted after exceeding its deadline.
    #[error("request aborted after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// Connection-level failure (DNS, TLS, refused connection).
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}
