//! HTTP client for outbound delivery with configurable timeouts.
//!
//! Handles request construction and response capture. Classification of the
//! response into a dispatch outcome happens in [`crate::dispatcher`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use outbound_core::{Clock, DeliveryId, TargetId};
use reqwest::{header::HeaderMap, Response};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Response bodies kept for audit are capped at this many bytes.
const MAX_AUDIT_SIZE: usize = 1024;
const DEFAULT_RETRY_AFTER: u64 = 60;

/// Configuration for the delivery HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default timeout for HTTP requests.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "Outbound-Delivery/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Pooled HTTP client shared by all workers.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

/// One POST to one target.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Record being delivered.
    pub delivery_id: DeliveryId,
    /// Target being delivered to.
    pub target_id: TargetId,
    /// Destination URL.
    pub url: String,
    /// Request body.
    pub body: Bytes,
    /// Content type of the body.
    pub content_type: String,
    /// Value for the event type header.
    pub event_type: Option<String>,
    /// Attempt number of the owning record.
    pub attempt_number: u32,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
}

/// Captured response from a delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Response body, truncated when large.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the status was 2xx.
    pub is_success: bool,
}

impl DeliveryClient {
    /// Creates a new delivery client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built from the provided settings.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Returns the client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POSTs the body to the target URL.
    ///
    /// Any HTTP response, including 4xx and 5xx, is returned as `Ok`.
    ///
    /// # Errors
    ///
    /// - `ConfigurationError` if the URL cannot be used to build a request
    /// - `Timeout` if no response arrived in time
    /// - `NetworkError` for connection and transport failures
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();
        let timeout = request.timeout.unwrap_or(self.config.timeout);

        let span = info_span!(
            "outbound_delivery",
            delivery_id = %request.delivery_id,
            target_id = %request.target_id,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!("starting delivery");

            let mut http_request = self
                .client
                .post(&request.url)
                .timeout(timeout)
                .body(request.body.clone())
                .header("content-type", &request.content_type)
                .header("X-Outbound-Delivery-Id", request.delivery_id.to_string())
                .header("X-Outbound-Target-Id", request.target_id.to_string())
                .header("X-Outbound-Attempt", request.attempt_number.to_string())
                .header("X-Outbound-Timestamp", self.clock.now_utc().to_rfc3339());

            if let Some(event_type) = &request.event_type {
                http_request = http_request.header("X-Outbound-Event-Type", event_type);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_builder() {
                        return Err(DeliveryError::configuration(format!("invalid request: {e}")));
                    }
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let delivery_response = parse_response(response, duration).await;

            match delivery_response.status_code {
                200..=299 => {
                    tracing::info!(
                        status = delivery_response.status_code,
                        duration_ms = duration.as_millis(),
                        "delivered"
                    );
                },
                400..=599 => {
                    tracing::warn!(
                        status = delivery_response.status_code,
                        duration_ms = duration.as_millis(),
                        "target rejected delivery"
                    );
                },
                _ => {
                    tracing::warn!(
                        status = delivery_response.status_code,
                        "unexpected status code"
                    );
                },
            }

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }

    /// Retry-After hint from a response, resolved against this client's
    /// clock.
    pub fn retry_after(&self, response: &DeliveryResponse) -> Option<u64> {
        extract_retry_after_seconds(&response.headers, self.clock.now_utc())
    }
}

async fn parse_response(response: Response, duration: Duration) -> DeliveryResponse {
    let status_code = response.status().as_u16();
    let is_success = response.status().is_success();
    let headers = extract_headers(response.headers());

    let body = match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_AUDIT_SIZE => {
            let suffix = "... (truncated)";
            let truncated = String::from_utf8_lossy(&bytes[..MAX_AUDIT_SIZE - suffix.len()]);
            format!("{truncated}{suffix}")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read response body: {}", e);
            format!("[failed to read response body: {e}]")
        },
    };

    DeliveryResponse { status_code, headers, body, duration, is_success }
}

fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|value| (key.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Extracts a retry-after delay from response headers.
///
/// Accepts delta-seconds or an RFC 2822 date. Unparseable values fall back
/// to 60 seconds; dates in the past give zero.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
    now: DateTime<Utc>,
) -> Option<u64> {
    let retry_after = headers.get("retry-after").or_else(|| headers.get("Retry-After"))?;

    if let Ok(seconds) = retry_after.trim().parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = DateTime::parse_from_rfc2822(retry_after) {
        let wait = date_time.with_timezone(&Utc).signed_duration_since(now);
        return Some(wait.to_std().map_or(0, |d| d.as_secs()));
    }

    Some(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use outbound_core::RealClock;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client() -> DeliveryClient {
        DeliveryClient::new(ClientConfig::default(), Arc::new(RealClock::new())).expect("client")
    }

    fn create_test_request(url: String) -> DeliveryRequest {
        DeliveryRequest {
            delivery_id: DeliveryId::new(),
            target_id: TargetId::new(),
            url,
            body: Bytes::from(r#"{"hello":"world"}"#),
            content_type: "application/json".to_string(),
            event_type: Some("order.created".to_string()),
            attempt_number: 2,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn successful_delivery_sends_tracking_headers() {
        let mock_server = MockServer::start().await;
        let request = create_test_request(format!("{}/hook", mock_server.uri()));

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::header("X-Outbound-Delivery-Id", request.delivery_id.to_string()))
            .and(matchers::header("X-Outbound-Target-Id", request.target_id.to_string()))
            .and(matchers::header("X-Outbound-Attempt", "2"))
            .and(matchers::header("X-Outbound-Event-Type", "order.created"))
            .and(matchers::header_exists("X-Outbound-Timestamp"))
            .and(matchers::body_string(r#"{"hello":"world"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = client().deliver(request).await.expect("delivered");
        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body, "OK");
    }

    #[tokio::test]
    async fn error_statuses_are_returned_not_raised() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .mount(&mock_server)
            .await;

        let response = client()
            .deliver(create_test_request(format!("{}/hook", mock_server.uri())))
            .await
            .expect("response captured");
        assert_eq!(response.status_code, 503);
        assert!(!response.is_success);
        assert_eq!(response.body, "Service Unavailable");
    }

    #[tokio::test]
    async fn large_bodies_are_truncated() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100 * 1024)))
            .mount(&mock_server)
            .await;

        let response = client()
            .deliver(create_test_request(mock_server.uri()))
            .await
            .expect("delivered");
        assert_eq!(response.body.len(), MAX_AUDIT_SIZE);
        assert!(response.body.ends_with("... (truncated)"));
    }

    #[tokio::test]
    async fn mid_sized_error_bodies_are_capped() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("e".repeat(4 * 1024)))
            .mount(&mock_server)
            .await;

        let response = client()
            .deliver(create_test_request(mock_server.uri()))
            .await
            .expect("response captured");
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body.len(), MAX_AUDIT_SIZE);
        assert!(response.body.ends_with("... (truncated)"));

        let exact = "e".repeat(MAX_AUDIT_SIZE);
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string(exact.clone()))
            .mount(&mock_server)
            .await;
        let response = client()
            .deliver(create_test_request(mock_server.uri()))
            .await
            .expect("response captured");
        assert_eq!(response.body, exact);
    }

    #[tokio::test]
    async fn slow_target_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let mut request = create_test_request(mock_server.uri());
        request.timeout = Some(Duration::from_millis(100));

        let result = client().deliver(request).await;
        assert!(matches!(result, Err(DeliveryError::Timeout { .. })));
    }

    #[tokio::test]
    async fn unreachable_target_is_a_network_error() {
        let request = create_test_request("http://127.0.0.1:1/hook".to_string());
        let result = client().deliver(request).await;
        assert!(matches!(result, Err(DeliveryError::NetworkError { .. })));
    }

    #[test]
    fn retry_after_parsing() {
        let now = Utc::now();
        let mut headers = HashMap::new();
        assert_eq!(extract_retry_after_seconds(&headers, now), None);

        headers.insert("retry-after".to_string(), "120".to_string());
        assert_eq!(extract_retry_after_seconds(&headers, now), Some(120));

        let future = (now + chrono::Duration::seconds(90)).to_rfc2822();
        headers.insert("retry-after".to_string(), future);
        let parsed = extract_retry_after_seconds(&headers, now).expect("date parsed");
        assert!((89..=90).contains(&parsed));

        headers.insert("retry-after".to_string(), "soon".to_string());
        assert_eq!(extract_retry_after_seconds(&headers, now), Some(DEFAULT_RETRY_AFTER));
    }
}
