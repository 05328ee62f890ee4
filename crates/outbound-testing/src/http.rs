//! Mock delivery targets backed by wiremock.
//!
//! Every target in a test is a path on one mock server. Responses can be
//! fixed, scripted as a sequence, or made to fail forever, and every request
//! the engine sends is recorded for later assertions.

use std::collections::HashMap;

use serde_json::Value;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer as WireMockServer, Request, ResponseTemplate,
};

/// Mock HTTP server standing in for delivery targets.
pub struct MockServer {
    server: WireMockServer,
}

impl MockServer {
    /// Starts a new server on a random local port.
    pub async fn start() -> Self {
        Self { server: WireMockServer::start().await }
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Full URL for a target path.
    pub fn target_url(&self, target_path: &str) -> String {
        format!("{}{}", self.server.uri(), target_path)
    }

    /// Mounts a fixed response for POSTs to an endpoint.
    pub async fn mock_endpoint(&self, endpoint: MockEndpoint) {
        let mut mock = Mock::given(method("POST")).and(path(endpoint.path.as_str()));
        for (name, value) in &endpoint.expected_headers {
            mock = mock.and(header(name.as_str(), value.as_str()));
        }
        mock.respond_with(endpoint.response.into_template()).mount(&self.server).await;
    }

    /// Starts a scripted sequence of responses for one path.
    pub fn mock_sequence(&self, target_path: &str) -> MockSequenceBuilder<'_> {
        MockSequenceBuilder { server: &self.server, path: target_path.to_string(), steps: Vec::new() }
    }

    /// Mounts an endpoint that answers every request with `status`.
    pub async fn mock_endpoint_always_fail(&self, target_path: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(target_path))
            .respond_with(ResponseTemplate::new(status).set_body_string("Service Unavailable"))
            .mount(&self.server)
            .await;
    }

    /// All requests received so far, oldest first.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(RecordedRequest::from_wiremock)
            .collect()
    }

    /// Requests received on one path.
    pub async fn requests_for(&self, target_path: &str) -> Vec<RecordedRequest> {
        self.received_requests().await.into_iter().filter(|r| r.path == target_path).collect()
    }

    /// Asserts how many requests hit a path.
    ///
    /// # Panics
    ///
    /// Panics when the count differs.
    pub async fn assert_request_count(&self, target_path: &str, expected: usize) {
        let actual = self.requests_for(target_path).await.len();
        assert_eq!(actual, expected, "unexpected request count for {target_path}");
    }
}

/// A request captured by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    fn from_wiremock(request: &Request) -> Self {
        let headers = request
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        Self {
            method: request.method.to_string(),
            path: request.url.path().to_string(),
            headers,
            body: request.body.clone(),
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Body parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

/// Fixed response for one endpoint.
#[derive(Debug, Clone)]
pub struct MockEndpoint {
    path: String,
    expected_headers: Vec<(String, String)>,
    response: MockResponse,
}

impl MockEndpoint {
    /// Endpoint that always answers 200.
    pub fn success(target_path: &str) -> Self {
        Self {
            path: target_path.to_string(),
            expected_headers: Vec::new(),
            response: MockResponse::Success { status: 200, body: "OK".to_string() },
        }
    }

    /// Endpoint that always answers with `status`.
    pub fn failure(target_path: &str, status: u16) -> Self {
        Self {
            path: target_path.to_string(),
            expected_headers: Vec::new(),
            response: MockResponse::Failure { status, body: "error".to_string(), retry_after: None },
        }
    }

    /// Only match requests carrying this header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.expected_headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replaces the response body.
    #[must_use]
    pub fn with_body(mut self, new_body: &str) -> Self {
        match &mut self.response {
            MockResponse::Success { body, .. } | MockResponse::Failure { body, .. } => {
                *body = new_body.to_string();
            },
            MockResponse::Delayed { .. } => {},
        }
        self
    }

    /// Adds a Retry-After header to a failure response.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        if let MockResponse::Failure { retry_after, .. } = &mut self.response {
            *retry_after = Some(seconds);
        }
        self
    }

    /// Answers after a delay.
    #[must_use]
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        let status = match &self.response {
            MockResponse::Success { status, .. }
            | MockResponse::Failure { status, .. }
            | MockResponse::Delayed { status, .. } => *status,
        };
        self.response = MockResponse::Delayed { status, delay };
        self
    }
}

/// Response shapes for mocked targets.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// 2xx with a body.
    Success {
        /// Status code.
        status: u16,
        /// Body.
        body: String,
    },
    /// Non-2xx, optionally with Retry-After.
    Failure {
        /// Status code.
        status: u16,
        /// Body.
        body: String,
        /// Retry-After seconds.
        retry_after: Option<u64>,
    },
    /// Any status, sent after a delay.
    Delayed {
        /// Status code.
        status: u16,
        /// Delay before responding.
        delay: std::time::Duration,
    },
}

impl MockResponse {
    fn into_template(self) -> ResponseTemplate {
        match self {
            Self::Success { status, body } => ResponseTemplate::new(status).set_body_string(body),
            Self::Failure { status, body, retry_after } => {
                let template = ResponseTemplate::new(status).set_body_string(body);
                match retry_after {
                    Some(seconds) => template.insert_header("Retry-After", seconds.to_string()),
                    None => template,
                }
            },
            Self::Delayed { status, delay } => ResponseTemplate::new(status).set_delay(delay),
        }
    }
}

/// Builder for a response sequence on one path.
///
/// Each step answers exactly one request, in order. The final
/// [`Self::then_always`] step answers every request after that.
pub struct MockSequenceBuilder<'a> {
    server: &'a WireMockServer,
    path: String,
    steps: Vec<MockResponse>,
}

impl MockSequenceBuilder<'_> {
    /// Next request gets a 2xx.
    #[must_use]
    pub fn respond_with(mut self, status: u16, body: &str) -> Self {
        self.steps.push(MockResponse::Success { status, body: body.to_string() });
        self
    }

    /// Next request gets a failure status.
    #[must_use]
    pub fn fail_with(mut self, status: u16) -> Self {
        self.steps.push(MockResponse::Failure {
            status,
            body: "error".to_string(),
            retry_after: None,
        });
        self
    }

    /// Next request gets a 429 with Retry-After.
    #[must_use]
    pub fn rate_limited(mut self, retry_after_seconds: u64) -> Self {
        self.steps.push(MockResponse::Failure {
            status: 429,
            body: "slow down".to_string(),
            retry_after: Some(retry_after_seconds),
        });
        self
    }

    /// Mounts the one-shot steps without a fallback.
    pub async fn build(self) {
        for step in self.steps {
            Mock::given(method("POST"))
                .and(path(self.path.as_str()))
                .respond_with(step.into_template())
                .up_to_n_times(1)
                .mount(self.server)
                .await;
        }
    }

    /// Mounts the one-shot steps, then answers `status` forever.
    pub async fn then_always(self, status: u16) {
        let server = self.server;
        let target_path = self.path.clone();
        self.build().await;
        Mock::given(method("POST"))
            .and(path(target_path.as_str()))
            .respond_with(ResponseTemplate::new(status).set_body_string("OK"))
            .mount(server)
            .await;
    }
}
