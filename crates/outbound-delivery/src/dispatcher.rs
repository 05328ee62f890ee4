//! Single-attempt dispatch to one target.
//!
//! The dispatcher never retries on its own. It makes one attempt and
//! reports how it went; the retry scheduler decides what happens next.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use outbound_core::{DeliveryId, Target, TargetOutcome};

use crate::client::{DeliveryClient, DeliveryRequest};

/// One attempt to deliver a body to a target.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Record being delivered.
    pub delivery_id: DeliveryId,
    /// Destination.
    pub target: Target,
    /// Body to POST.
    pub body: Bytes,
    /// Content type of the body.
    pub content_type: String,
    /// Event type header value.
    pub event_type: Option<String>,
    /// Attempt number of the owning record.
    pub attempt_number: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

/// How one attempt went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Classified result.
    pub outcome: TargetOutcome,
    /// HTTP status, when a response arrived.
    pub http_status: Option<u16>,
    /// Failure detail for non-delivered outcomes.
    pub error_detail: Option<String>,
    /// Server-requested wait before the next attempt.
    pub retry_after: Option<Duration>,
    /// Wall time spent on the attempt.
    pub duration: Duration,
}

impl DispatchReport {
    /// Report for a 2xx response.
    pub fn delivered(http_status: u16, duration: Duration) -> Self {
        Self {
            outcome: TargetOutcome::Delivered,
            http_status: Some(http_status),
            error_detail: None,
            retry_after: None,
            duration,
        }
    }

    /// Report for a failed attempt.
    pub fn rejected(
        outcome: TargetOutcome,
        http_status: Option<u16>,
        error_detail: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            outcome,
            http_status,
            error_detail: Some(error_detail.into()),
            retry_after: None,
            duration,
        }
    }

    /// Attaches a Retry-After hint.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Performs one delivery attempt.
#[async_trait]
pub trait Dispatcher: Send + Sync + std::fmt::Debug {
    /// Attempts delivery once. Infallible: every failure is a report.
    async fn attempt(&self, request: DispatchRequest) -> DispatchReport;
}

/// Maps an HTTP status to a dispatch outcome.
///
/// 2xx is delivered. 429 and 5xx are transient. Every other status,
/// including 1xx and 3xx left after redirects, is permanent.
pub fn classify_status(status: u16) -> TargetOutcome {
    match status {
        200..=299 => TargetOutcome::Delivered,
        429 | 500..=599 => TargetOutcome::RejectedTransient,
        _ => TargetOutcome::RejectedPermanent,
    }
}

#[async_trait]
impl Dispatcher for DeliveryClient {
    async fn attempt(&self, request: DispatchRequest) -> DispatchReport {
        let started = std::time::Instant::now();
        let delivery = DeliveryRequest {
            delivery_id: request.delivery_id,
            target_id: request.target.id,
            url: request.target.url,
            body: request.body,
            content_type: request.content_type,
            event_type: request.event_type,
            attempt_number: request.attempt_number,
            timeout: Some(request.timeout),
        };

        match self.deliver(delivery).await {
            Ok(response) => {
                let outcome = classify_status(response.status_code);
                if outcome == TargetOutcome::Delivered {
                    return DispatchReport::delivered(response.status_code, response.duration);
                }

                let detail = if response.body.is_empty() {
                    format!("HTTP {}", response.status_code)
                } else {
                    format!("HTTP {}: {}", response.status_code, response.body)
                };
                let report =
                    DispatchReport::rejected(outcome, Some(response.status_code), detail, response.duration);

                match self.retry_after(&response) {
                    Some(seconds) if response.status_code == 429 => {
                        report.with_retry_after(Duration::from_secs(seconds))
                    },
                    _ => report,
                }
            },
            Err(error) => DispatchReport::rejected(
                error.outcome().unwrap_or(TargetOutcome::RejectedTransient),
                None,
                error.to_string(),
                started.elapsed(),
            ),
        }
    }
}
