//! Webhook endpoint handlers.
//!
//! Two forwarding contracts live here:
//! 1. The forward endpoint relays synchronously and reflects the downstream
//!    outcome to the caller (200 relayed, 502 rejected downstream, 500
//!    anything else).
//! 2. The products/update endpoint acknowledges immediately with a plain
//!    200 OK and hands CRM delivery to a detached task, so the upstream
//!    platform never re-delivers because of a slow or broken CRM.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::forward::{self, CrmEnvelope, ForwardError, RelayEnvelope};
use crate::web::signature::authenticate_webhook;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, http: reqwest::Client) -> Self {
        Self {
            config: Arc::new(config),
            http,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Forward Webhook (synchronous relay)
// =============================================================================

/// Success response after a completed relay.
#[derive(Serialize)]
pub struct ForwardAck {
    pub success: bool,
    pub topic: String,
    pub shop: String,
    pub forwarded: bool,
    /// Downstream response body when it parsed as JSON, `null` otherwise
    #[serde(rename = "forwardResponse")]
    pub forward_response: Option<Value>,
}

/// Response when the downstream destination rejected the envelope.
#[derive(Serialize)]
pub struct ForwardRejected {
    pub error: &'static str,
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
}

/// Response for any internal failure, authentication included.
#[derive(Serialize)]
pub struct InternalError {
    pub error: &'static str,
    pub message: String,
}

/// Forward webhook endpoint.
///
/// This endpoint:
/// 1. Verifies the HMAC signature (if configured)
/// 2. Re-POSTs the full envelope to the forward URL and waits for it
/// 3. Reflects the downstream outcome to the caller
///
/// Authentication failures collapse into the 500 branch; the platform
/// retries on any non-2xx either way. The outbound call lives on a spawned
/// task whose handle is awaited here, so a caller that disconnects early
/// never cancels a relay already in flight.
pub async fn forward_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let webhook = match authenticate_webhook(&state.config.shopify_api_secret, &headers, &body) {
        Ok(webhook) => webhook,
        Err(e) => {
            error!(error = %e, "forward_webhook_auth_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InternalError {
                    error: "Internal server error",
                    message: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    info!(
        topic = %webhook.topic,
        shop = %webhook.shop,
        webhook_id = ?webhook.webhook_id,
        "forward_webhook_received"
    );

    let envelope =
        RelayEnvelope::new(webhook.topic, webhook.shop, webhook.payload, webhook.session);

    let timeout = Duration::from_millis(state.config.forward_timeout_ms);
    let topic = envelope.topic.clone();
    let shop = envelope.shop.clone();

    // The relay runs on its own task: a caller hangup drops this handler
    // future, not the outbound call already in flight.
    let http = state.http.clone();
    let forward_url = state.config.forward_url.clone();
    let outbound = tokio::spawn(async move {
        forward::forward_envelope(&http, &forward_url, &envelope, timeout).await
    });

    let outcome = match outbound.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(topic = %topic, shop = %shop, error = %e, "forward_webhook_task_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InternalError {
                    error: "Internal server error",
                    message: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    match outcome {
        Ok(forward_response) => {
            info!(topic = %topic, shop = %shop, "forward_webhook_relayed");
            (
                StatusCode::OK,
                Json(ForwardAck {
                    success: true,
                    topic,
                    shop,
                    forwarded: true,
                    forward_response,
                }),
            )
                .into_response()
        }
        Err(ForwardError::Status {
            status,
            status_text,
            ..
        }) => (
            StatusCode::BAD_GATEWAY,
            Json(ForwardRejected {
                error: "Failed to forward webhook",
                status,
                status_text,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(InternalError {
                error: "Internal server error",
                message: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// =============================================================================
// Products Update Webhook (acknowledge-then-forward)
// =============================================================================

/// Products/update webhook endpoint.
///
/// This endpoint:
/// 1. Verifies the HMAC signature (if configured)
/// 2. Spawns the CRM delivery as a detached task
/// 3. Returns 200 OK immediately
///
/// The response is 200 even when authentication or delivery fails. A non-200
/// here only makes the platform re-deliver a webhook this relay already
/// knows it cannot process, so failures are logged and swallowed.
pub async fn products_update_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    match authenticate_webhook(&state.config.shopify_api_secret, &headers, &body) {
        Ok(webhook) => {
            info!(
                topic = %webhook.topic,
                shop = %webhook.shop,
                webhook_id = ?webhook.webhook_id,
                "products_update_received"
            );

            let envelope = CrmEnvelope::new(webhook.shop, webhook.topic, webhook.payload);
            let http = state.http.clone();
            let crm_url = state.config.crm_webhook_url.clone();
            let timeout = Duration::from_millis(state.config.crm_timeout_ms);

            // Detached on purpose: the acknowledgement must not wait on the CRM
            tokio::spawn(async move {
                if let Err(e) = forward::send_to_crm(&http, &crm_url, &envelope, timeout).await {
                    error!(
                        shop = %envelope.shop,
                        event = %envelope.event,
                        error = %e,
                        "crm_delivery_failed"
                    );
                }
            });
        }
        Err(e) => {
            error!(error = %e, "products_update_auth_failed");
        }
    }

    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::router;
    use crate::web::signature::{HEADER_HMAC, HEADER_SHOP_DOMAIN, HEADER_TOPIC};
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use http_body_util::BodyExt;
    use sha2::Sha256;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_SECRET: &str = "shpss_test_secret";

    /// Address that refuses connections immediately (TCP discard port).
    const UNREACHABLE: &str = "http://127.0.0.1:9/";

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(TEST_SECRET.as_bytes()).unwrap();
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn test_config(forward_url: &str, crm_url: &str) -> Config {
        Config {
            port: 0,
            shopify_api_secret: Some(TEST_SECRET.to_string()),
            forward_url: Url::parse(forward_url).unwrap(),
            crm_webhook_url: Url::parse(crm_url).unwrap(),
            forward_timeout_ms: 2_000,
            crm_timeout_ms: 2_000,
        }
    }

    fn test_app(config: Config) -> axum::Router {
        router(AppState::new(config, reqwest::Client::new()))
    }

    fn signed_request(uri: &str, topic: &str, shop: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(HEADER_TOPIC, topic)
            .header(HEADER_SHOP_DOMAIN, shop)
            .header(HEADER_HMAC, sign(body.as_bytes()))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn response_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Read one HTTP request (headers plus `content-length` body) off a socket.
    async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                let body_len: usize = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        request
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(test_config(UNREACHABLE, UNREACHABLE));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_forward_webhook_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/webhook/receiver"))
            .and(header("content-type", "application/json"))
            .and(header("X-Webhook-Topic", "products/update"))
            .and(header("X-Webhook-Shop", "test-store.myshopify.com"))
            .and(header("X-Webhook-Source", "shopify-app"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"received": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let app = test_app(test_config(
            &format!("{}/webhook/receiver", server.uri()),
            UNREACHABLE,
        ));

        let body = r#"{"id": 42, "title": "Widget"}"#;
        let response = app
            .oneshot(signed_request(
                "/webhooks/forward",
                "products/update",
                "test-store.myshopify.com",
                body,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["topic"], "products/update");
        assert_eq!(json["shop"], "test-store.myshopify.com");
        assert_eq!(json["forwarded"], true);
        assert_eq!(json["forwardResponse"]["received"], true);

        // The relayed envelope wraps the webhook verbatim plus receipt metadata
        let requests = server.received_requests().await.unwrap();
        let relayed: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(relayed["topic"], "products/update");
        assert_eq!(relayed["shop"], "test-store.myshopify.com");
        assert_eq!(relayed["payload"]["id"], 42);
        assert!(relayed["session"].is_null());
        assert!(relayed["receivedAt"].is_string());
    }

    #[tokio::test]
    async fn test_forward_webhook_non_json_downstream_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("thanks"))
            .mount(&server)
            .await;

        let app = test_app(test_config(&server.uri(), UNREACHABLE));

        let response = app
            .oneshot(signed_request(
                "/webhooks/forward",
                "products/update",
                "test-store.myshopify.com",
                "{}",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["forwarded"], true);
        assert!(json["forwardResponse"].is_null());
    }

    #[tokio::test]
    async fn test_forward_webhook_downstream_rejection_maps_to_502() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let app = test_app(test_config(&server.uri(), UNREACHABLE));

        let response = app
            .oneshot(signed_request(
                "/webhooks/forward",
                "orders/create",
                "test-store.myshopify.com",
                "{}",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = response_json(response).await;
        assert_eq!(json["error"], "Failed to forward webhook");
        assert_eq!(json["status"], 503);
        assert_eq!(json["statusText"], "Service Unavailable");
    }

    #[tokio::test]
    async fn test_forward_webhook_unreachable_downstream_maps_to_500() {
        let app = test_app(test_config(UNREACHABLE, UNREACHABLE));

        let response = app
            .oneshot(signed_request(
                "/webhooks/forward",
                "products/update",
                "test-store.myshopify.com",
                "{}",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = response_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert!(json["message"].is_string());
    }

    #[tokio::test]
    async fn test_forward_webhook_bad_signature_maps_to_500() {
        let app = test_app(test_config(UNREACHABLE, UNREACHABLE));

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/forward")
            .header(HEADER_TOPIC, "products/update")
            .header(HEADER_SHOP_DOMAIN, "test-store.myshopify.com")
            .header(HEADER_HMAC, "bm90IGEgcmVhbCBzaWduYXR1cmU=")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = response_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert!(json["message"].is_string());
    }

    #[tokio::test]
    async fn test_forward_webhook_outlives_caller_disconnect() {
        // Downstream stub that stalls after reading the request and watches
        // for an early close from the relay.
        let downstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let downstream_url = format!("http://{}/", downstream.local_addr().unwrap());
        let (relayed_tx, relayed_rx) = tokio::sync::oneshot::channel();
        let (verdict_tx, verdict_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = downstream.accept().await.unwrap();
            let relayed = read_request(&mut socket).await;
            let _ = relayed_tx.send(relayed);

            let mut chunk = [0u8; 64];
            let eof = tokio::time::timeout(Duration::from_millis(1_200), socket.read(&mut chunk));
            let _ = verdict_tx.send(matches!(eof.await, Ok(Ok(0))));
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n{}")
                .await;
        });

        // A live connection, so the caller can hang up mid-relay.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = test_app(test_config(&downstream_url, UNREACHABLE));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let payload = br#"{"id": 42}"#;
        let head = format!(
            "POST /webhooks/forward HTTP/1.1\r\n\
             host: {addr}\r\n\
             content-type: application/json\r\n\
             content-length: {len}\r\n\
             {topic}: products/update\r\n\
             {shop}: test-store.myshopify.com\r\n\
             {hmac}: {signature}\r\n\
             \r\n",
            len = payload.len(),
            topic = HEADER_TOPIC,
            shop = HEADER_SHOP_DOMAIN,
            hmac = HEADER_HMAC,
            signature = sign(payload),
        );
        let mut caller = TcpStream::connect(addr).await.unwrap();
        caller.write_all(head.as_bytes()).await.unwrap();
        caller.write_all(payload).await.unwrap();

        // Hang up as soon as the relayed request is in flight downstream
        let relayed = relayed_rx.await.unwrap();
        drop(caller);

        let hung_up = verdict_rx.await.unwrap();
        assert!(
            !hung_up,
            "in-flight forward was torn down with the caller's connection"
        );
        let relayed = String::from_utf8_lossy(&relayed);
        assert!(relayed.contains(r#""topic":"products/update""#));
    }

    #[tokio::test]
    async fn test_products_update_acknowledges_before_crm_settles() {
        let server = MockServer::start().await;

        // CRM far slower than the acknowledgement should ever take
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let app = test_app(test_config(UNREACHABLE, &server.uri()));

        let started = Instant::now();
        let response = app
            .oneshot(signed_request(
                "/webhooks/products/update",
                "products/update",
                "test-store.myshopify.com",
                r#"{"id": 7}"#,
            ))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            elapsed < Duration::from_secs(2),
            "acknowledgement waited on the CRM: {:?}",
            elapsed
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_products_update_delivers_to_crm() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/webhook/shopify-gamer"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let app = test_app(test_config(
            UNREACHABLE,
            &format!("{}/webhook/shopify-gamer", server.uri()),
        ));

        let response = app
            .oneshot(signed_request(
                "/webhooks/products/update",
                "products/update",
                "test-store.myshopify.com",
                r#"{"id": 7, "title": "Widget"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        // Delivery is detached; wait for the CRM to see it
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let requests = server.received_requests().await.unwrap();
            if !requests.is_empty() {
                let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
                assert_eq!(sent["shop"], "test-store.myshopify.com");
                assert_eq!(sent["event"], "products/update");
                assert_eq!(sent["product"]["id"], 7);
                assert!(sent["timestamp"].is_string());
                break;
            }
            assert!(Instant::now() < deadline, "CRM never received the delivery");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_products_update_acknowledges_on_auth_failure() {
        let app = test_app(test_config(UNREACHABLE, UNREACHABLE));

        // Signed with the wrong digest
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/products/update")
            .header(HEADER_TOPIC, "products/update")
            .header(HEADER_SHOP_DOMAIN, "test-store.myshopify.com")
            .header(HEADER_HMAC, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_products_update_crm_timeout_stays_contained() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut config = test_config(UNREACHABLE, &server.uri());
        config.crm_timeout_ms = 50;
        let app = test_app(config);

        let response = app
            .oneshot(signed_request(
                "/webhooks/products/update",
                "products/update",
                "test-store.myshopify.com",
                "{}",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        // The sleep only leaves the detached task room to run its error path;
        // the timeout classification itself is asserted in the crm module.
        // The stub still saw the attempt the relay gave up waiting on.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
