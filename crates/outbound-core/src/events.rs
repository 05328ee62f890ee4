//! Audit events emitted at the end of a record's lifecycle.
//!
//! The engine publishes a [`DeliveryEvent`] when a record reaches a terminal
//! status or is manually retried. Subscribers (a history service, a log
//! sink) implement [`EventHandler`]; the engine never waits on their result.
//!
//! ```text
//!                     Completed / RetryRequested
//! ┌─────────────────┐                        ┌────────────────────┐
//! │ DeliveryWorker  │ ──────────────────────▶│ MulticastHandler   │
//! │ DeliveryEngine  │                        └────────────────────┘
//! └─────────────────┘                                  │
//!                                          ┌───────────┴──────────┐
//!                                          ▼                      ▼
//!                                 ┌─────────────────┐   ┌──────────────────┐
//!                                 │ History sink    │   │ LoggingHandler   │
//!                                 └─────────────────┘   └──────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    DeliveryId, DeliveryKind, DeliveryRecord, DeliveryStatus, TargetId, TargetOutcome,
};

/// Events emitted by the delivery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// Record reached a terminal status.
    Completed(DeliveryCompletedEvent),

    /// Operator moved a failed record back to pending.
    RetryRequested(DeliveryRetryRequestedEvent),
}

impl DeliveryEvent {
    /// Record the event is about.
    pub fn delivery_id(&self) -> DeliveryId {
        match self {
            Self::Completed(event) => event.delivery_id,
            Self::RetryRequested(event) => event.delivery_id,
        }
    }
}

/// Latest state of one target at completion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    /// Target identity.
    pub target_id: TargetId,
    /// Destination URL.
    pub url: String,
    /// Registry client, if the target came from one.
    pub client_id: Option<String>,
    /// Latest outcome, `None` if never dispatched.
    pub outcome: Option<TargetOutcome>,
    /// Dispatches made to this target.
    pub attempts: u32,
    /// HTTP status of the latest response.
    pub last_http_status: Option<u16>,
    /// Error detail of the latest rejection.
    pub last_error: Option<String>,
}

impl TargetSummary {
    /// Summarizes every target of a record, in target order.
    pub fn for_record(record: &DeliveryRecord) -> Vec<Self> {
        record
            .targets
            .iter()
            .map(|target| {
                let latest = record.latest_result(target.id);
                Self {
                    target_id: target.id,
                    url: target.url.clone(),
                    client_id: target.client_id.clone(),
                    outcome: latest.map(|a| a.outcome),
                    attempts: u32::try_from(record.dispatch_count(target.id)).unwrap_or(u32::MAX),
                    last_http_status: latest.and_then(|a| a.http_status),
                    last_error: latest.and_then(|a| a.error_detail.clone()),
                }
            })
            .collect()
    }
}

/// Event emitted when a record reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryCompletedEvent {
    /// Record identity.
    pub delivery_id: DeliveryId,

    /// Kind of work.
    pub kind: DeliveryKind,

    /// Terminal status.
    pub status: DeliveryStatus,

    /// Claims consumed.
    pub attempt_count: u32,

    /// Per-target outcome.
    pub targets: Vec<TargetSummary>,

    /// When the terminal status was recorded.
    pub completed_at: DateTime<Utc>,

    /// SHA-256 of the stored payload.
    pub payload_digest: [u8; 32],

    /// Failure summary of the last round.
    pub last_error: Option<String>,
}

impl DeliveryCompletedEvent {
    /// Builds the event from a terminal record.
    pub fn from_record(record: &DeliveryRecord) -> Self {
        let targets = TargetSummary::for_record(record);

        Self {
            delivery_id: record.id,
            kind: record.kind,
            status: record.status,
            attempt_count: record.attempt_count,
            targets,
            completed_at: record.completed_at.unwrap_or(record.updated_at),
            payload_digest: record.payload_digest(),
            last_error: record.last_error.clone(),
        }
    }

    /// History label for this completion.
    ///
    /// Partial success counts as sent: at least one recipient got it.
    pub fn audit_label(&self) -> &'static str {
        let sent = matches!(self.status, DeliveryStatus::Succeeded | DeliveryStatus::PartiallyFailed);
        match (self.kind, sent) {
            (DeliveryKind::SingleMessage, true) => "message_sent",
            (DeliveryKind::SingleMessage, false) => "message_failed",
            (DeliveryKind::WebhookEvent, true) => "webhook_sent",
            (DeliveryKind::WebhookEvent, false) => "webhook_failed",
        }
    }
}

/// Event emitted when a failed record is manually retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRetryRequestedEvent {
    /// Record identity.
    pub delivery_id: DeliveryId,
    /// Status the record was retried from.
    pub previous_status: DeliveryStatus,
    /// When the retry was accepted.
    pub requested_at: DateTime<Utc>,
}

/// Subscriber to delivery events.
///
/// Handlers must not block delivery processing. Failures are logged by the
/// handler itself and never propagated back to the engine.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// Handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Handler that writes one structured log line per event.
#[derive(Debug, Default)]
pub struct LoggingEventHandler;

impl LoggingEventHandler {
    /// Creates a new logging handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        match event {
            DeliveryEvent::Completed(completed) => {
                let delivered = completed
                    .targets
                    .iter()
                    .filter(|t| t.outcome == Some(TargetOutcome::Delivered))
                    .count();
                tracing::info!(
                    delivery_id = %completed.delivery_id,
                    label = completed.audit_label(),
                    status = %completed.status,
                    attempt_count = completed.attempt_count,
                    delivered,
                    targets = completed.targets.len(),
                    "delivery completed"
                );
            },
            DeliveryEvent::RetryRequested(retry) => {
                tracing::info!(
                    delivery_id = %retry.delivery_id,
                    previous_status = %retry.previous_status,
                    "delivery retry requested"
                );
            },
        }
    }
}

/// Handler that forwards each event to every subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        let deliveries = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_event(event).await;
            }
        });

        futures::future::join_all(deliveries).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;
    use serde_json::Map;

    use super::*;
    use crate::models::{
        ClaimToken, DeliveryCommit, NewDelivery, NextAction, Payload, Target, TargetAttempt,
        TargetSpec,
    };

    #[derive(Debug)]
    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: DeliveryEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn terminal_record(kind: DeliveryKind, status: DeliveryStatus) -> DeliveryRecord {
        let payload = match kind {
            DeliveryKind::WebhookEvent => Payload::Raw {
                body: "{}".to_string(),
                content_type: "application/json".to_string(),
                event_type: None,
            },
            DeliveryKind::SingleMessage => Payload::Template {
                template: "hi".to_string(),
                context: serde_json::json!({}),
                format: Default::default(),
            },
        };
        let request = NewDelivery {
            kind,
            targets: vec![TargetSpec::url("https://example.com")],
            payload,
            metadata: Map::new(),
            max_attempts: None,
        };
        let now = Utc::now();
        let target = Target::new("https://example.com");
        let target_id = target.id;
        let mut record = DeliveryRecord::new(request, vec![target], 3, now);
        record.claim(ClaimToken::new(), ChronoDuration::minutes(5), now);
        record
            .apply_commit(
                DeliveryCommit {
                    results: vec![(
                        target_id,
                        TargetAttempt {
                            attempt_number: 1,
                            generation: 0,
                            outcome: TargetOutcome::Delivered,
                            http_status: Some(200),
                            error_detail: None,
                            attempted_at: now,
                            duration_ms: 12,
                        },
                    )],
                    action: NextAction::Finalize(status),
                    last_error: None,
                },
                now,
            )
            .expect("commit applies");
        record
    }

    #[test]
    fn completed_event_summarizes_targets() {
        let record = terminal_record(DeliveryKind::WebhookEvent, DeliveryStatus::Succeeded);
        let event = DeliveryCompletedEvent::from_record(&record);

        assert_eq!(event.delivery_id, record.id);
        assert_eq!(event.attempt_count, 1);
        assert_eq!(event.targets.len(), 1);
        assert_eq!(event.targets[0].outcome, Some(TargetOutcome::Delivered));
        assert_eq!(event.targets[0].attempts, 1);
        assert_eq!(event.targets[0].last_http_status, Some(200));
        assert_eq!(event.payload_digest, record.payload_digest());
    }

    #[test]
    fn audit_labels_follow_kind_and_status() {
        let cases = [
            (DeliveryKind::SingleMessage, DeliveryStatus::Succeeded, "message_sent"),
            (DeliveryKind::SingleMessage, DeliveryStatus::Failed, "message_failed"),
            (DeliveryKind::WebhookEvent, DeliveryStatus::PartiallyFailed, "webhook_sent"),
            (DeliveryKind::WebhookEvent, DeliveryStatus::DeadLettered, "webhook_failed"),
        ];
        for (kind, status, label) in cases {
            let event = DeliveryCompletedEvent::from_record(&terminal_record(kind, status));
            assert_eq!(event.audit_label(), label, "{kind} {status}");
        }
    }

    #[tokio::test]
    async fn multicast_handler_forwards_to_all_subscribers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut multicast = MulticastEventHandler::new();
        multicast.add_subscriber(Arc::new(CountingHandler { count: counter.clone() }));
        multicast.add_subscriber(Arc::new(CountingHandler { count: counter.clone() }));
        assert_eq!(multicast.subscriber_count(), 2);

        let record = terminal_record(DeliveryKind::WebhookEvent, DeliveryStatus::Succeeded);
        multicast
            .handle_event(DeliveryEvent::Completed(DeliveryCompletedEvent::from_record(&record)))
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_op_and_logging_handlers_accept_events() {
        let event = DeliveryEvent::RetryRequested(DeliveryRetryRequestedEvent {
            delivery_id: DeliveryId::new(),
            previous_status: DeliveryStatus::Failed,
            requested_at: Utc::now(),
        });
        NoOpEventHandler::new().handle_event(event.clone()).await;
        LoggingEventHandler::new().handle_event(event).await;
    }
}
