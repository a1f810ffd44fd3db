//! Synchronous relay - re-POSTing full webhook envelopes downstream.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{error, info};
use url::Url;

use super::types::RelayEnvelope;
use super::ForwardError;

/// Header carrying the webhook topic on relayed requests.
pub const HEADER_FORWARD_TOPIC: &str = "X-Webhook-Topic";

/// Header carrying the shop domain on relayed requests.
pub const HEADER_FORWARD_SHOP: &str = "X-Webhook-Shop";

/// Header identifying the sender of relayed requests.
pub const HEADER_FORWARD_SOURCE: &str = "X-Webhook-Source";

/// Value sent in the source header.
pub const FORWARD_SOURCE: &str = "shopify-app";

/// Re-POST a webhook envelope to the forward URL.
///
/// Issues a single POST with identifying headers and the envelope as JSON,
/// bounded by `timeout`. Returns the downstream response body parsed as
/// JSON when it parses, `None` when it does not (a non-JSON 2xx body still
/// counts as forwarded).
///
/// # Errors
///
/// - [`ForwardError::Status`] when the destination answers non-2xx; the
///   response body text is captured best effort
/// - [`ForwardError::Timeout`] when the deadline elapses first
/// - [`ForwardError::Transport`] for connection-level failures
pub async fn forward_envelope(
    client: &Client,
    forward_url: &Url,
    envelope: &RelayEnvelope,
    timeout: Duration,
) -> Result<Option<Value>, ForwardError> {
    let timeout_ms = timeout.as_millis() as u64;

    info!(
        url = %forward_url,
        topic = %envelope.topic,
        shop = %envelope.shop,
        timeout_ms = timeout_ms,
        "forward_request_starting"
    );

    let request = client
        .post(forward_url.clone())
        .timeout(timeout)
        .header(HEADER_FORWARD_TOPIC, &envelope.topic)
        .header(HEADER_FORWARD_SHOP, &envelope.shop)
        .header(HEADER_FORWARD_SOURCE, FORWARD_SOURCE)
        .json(envelope);

    let response = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            if e.is_timeout() {
                error!(
                    url = %forward_url,
                    topic = %envelope.topic,
                    timeout_ms = timeout_ms,
                    error = %e,
                    "forward_request_timeout"
                );
                return Err(ForwardError::Timeout { timeout_ms });
            }

            error!(
                url = %forward_url,
                topic = %envelope.topic,
                error = %e,
                "forward_request_error"
            );
            return Err(ForwardError::Transport(e));
        }
    };

    let status = response.status();

    if !status.is_success() {
        let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        error!(
            url = %forward_url,
            topic = %envelope.topic,
            shop = %envelope.shop,
            status = status.as_u16(),
            status_text = %status_text,
            body = %body,
            "forward_request_rejected"
        );

        return Err(ForwardError::Status {
            status: status.as_u16(),
            status_text,
            body,
        });
    }

    // A 2xx with a non-JSON (or empty) body is still a successful forward
    let forward_response: Option<Value> = response.json().await.ok();

    info!(
        topic = %envelope.topic,
        shop = %envelope.shop,
        status = status.as_u16(),
        response_is_json = forward_response.is_some(),
        "forward_request_complete"
    );

    Ok(forward_response)
}
