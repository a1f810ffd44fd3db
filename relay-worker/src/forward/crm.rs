//! CRM delivery - detached forwarding of product events.

use std::time::Duration;

use reqwest::Client;
use tracing::{error, info};
use url::Url;

use super::types::CrmEnvelope;
use super::ForwardError;

/// POST a product event to the CRM.
///
/// One attempt, bounded by `timeout`. The products/update endpoint spawns
/// this and never awaits it, so the outcome is visible only in the logs.
///
/// # Errors
///
/// - [`ForwardError::Status`] when the CRM answers non-2xx
/// - [`ForwardError::Timeout`] when the deadline elapses first
/// - [`ForwardError::Transport`] for connection-level failures
pub async fn send_to_crm(
    client: &Client,
    crm_url: &Url,
    envelope: &CrmEnvelope,
    timeout: Duration,
) -> Result<(), ForwardError> {
    let timeout_ms = timeout.as_millis() as u64;

    info!(
        url = %crm_url,
        shop = %envelope.shop,
        event = %envelope.event,
        timeout_ms = timeout_ms,
        "crm_delivery_starting"
    );

    let response = match client
        .post(crm_url.clone())
        .timeout(timeout)
        .json(envelope)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            if e.is_timeout() {
                error!(
                    url = %crm_url,
                    shop = %envelope.shop,
                    timeout_ms = timeout_ms,
                    error = %e,
                    "crm_delivery_timeout"
                );
                return Err(ForwardError::Timeout { timeout_ms });
            }

            error!(
                url = %crm_url,
                shop = %envelope.shop,
                error = %e,
                "crm_delivery_error"
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
            url = %crm_url,
            shop = %envelope.shop,
            event = %envelope.event,
            status = status.as_u16(),
            body = %body,
            "crm_delivery_rejected"
        );

        return Err(ForwardError::Status {
            status: status.as_u16(),
            status_text,
            body,
        });
    }

    info!(
        shop = %envelope.shop,
        event = %envelope.event,
        status = status.as_u16(),
        "crm_delivery_complete"
    );

    Ok(())
}
