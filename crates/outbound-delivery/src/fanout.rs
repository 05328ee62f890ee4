//! Fan-out of one record to all of its targets.
//!
//! A round renders the payload once, dispatches to every target that is not
//! yet delivered with bounded concurrency, and waits for all of them before
//! aggregating. The aggregate always looks at the latest result of *every*
//! target, including ones delivered in earlier rounds.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{stream, StreamExt};
use outbound_core::{
    Clock, DeliveryRecord, DeliveryStatus, Payload, Target, TargetAttempt, TargetId,
    TargetOutcome,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    dispatcher::{DispatchRequest, Dispatcher},
    render::TemplateRenderer,
};

/// Tuning for a fan-out round.
#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    /// Maximum dispatches in flight for one record.
    pub target_concurrency: usize,
    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            target_concurrency: crate::DEFAULT_TARGET_CONCURRENCY,
            request_timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

/// Latest-outcome counts over every target of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetTally {
    /// Targets whose latest attempt was delivered.
    pub delivered: usize,
    /// Targets whose latest attempt was a permanent rejection.
    pub rejected_permanent: usize,
    /// Targets whose latest attempt was a transient rejection.
    pub rejected_transient: usize,
    /// Largest Retry-After hint seen this round.
    pub retry_after: Option<Duration>,
}

impl TargetTally {
    /// Total targets counted.
    pub fn total(&self) -> usize {
        self.delivered + self.rejected_permanent + self.rejected_transient
    }

    /// Returns true if some target may still succeed on a later round.
    pub fn has_transient(&self) -> bool {
        self.rejected_transient > 0
    }
}

/// Result of a round, before scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// The payload could not be rendered; nothing was dispatched.
    Malformed {
        /// Renderer diagnostic
        reason: String,
    },
    /// Targets were dispatched.
    Dispatched(TargetTally),
}

impl AggregateOutcome {
    /// Record status implied by the latest target outcomes.
    ///
    /// All delivered is `Succeeded`, none delivered is `Failed`, and a mix
    /// is `PartiallyFailed`. A malformed payload is `Failed`.
    pub fn status(&self) -> DeliveryStatus {
        match self {
            Self::Malformed { .. } => DeliveryStatus::Failed,
            Self::Dispatched(tally) if tally.delivered == tally.total() => {
                DeliveryStatus::Succeeded
            },
            Self::Dispatched(tally) if tally.delivered == 0 => DeliveryStatus::Failed,
            Self::Dispatched(_) => DeliveryStatus::PartiallyFailed,
        }
    }
}

/// Everything one round produced.
#[derive(Debug, Clone)]
pub struct FanoutReport {
    /// New attempts, one per dispatched target.
    pub results: Vec<(TargetId, TargetAttempt)>,
    /// Aggregate over all targets.
    pub outcome: AggregateOutcome,
    failures: Vec<String>,
}

impl FanoutReport {
    /// One-line summary of what failed this round, if anything.
    pub fn failure_summary(&self) -> Option<String> {
        match &self.outcome {
            AggregateOutcome::Malformed { reason } => Some(reason.clone()),
            AggregateOutcome::Dispatched(_) if self.failures.is_empty() => None,
            AggregateOutcome::Dispatched(_) => Some(self.failures.join("; ")),
        }
    }
}

/// Body and headers shared by every dispatch in a round.
#[derive(Debug, Clone)]
enum PreparedPayload {
    Raw { body: Bytes, content_type: String, event_type: Option<String> },
    Message { content: String, format: &'static str },
}

/// Drives one round of dispatches for a claimed record.
#[derive(Debug)]
pub struct FanoutCoordinator {
    dispatcher: Arc<dyn Dispatcher>,
    renderer: Arc<TemplateRenderer>,
    clock: Arc<dyn Clock>,
    config: FanoutConfig,
}

impl FanoutCoordinator {
    /// Creates a coordinator.
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        renderer: Arc<TemplateRenderer>,
        clock: Arc<dyn Clock>,
        config: FanoutConfig,
    ) -> Self {
        Self { dispatcher, renderer, clock, config }
    }

    /// Runs one round for `record`.
    pub async fn process(&self, record: &DeliveryRecord) -> FanoutReport {
        let prepared = match self.prepare(record) {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!(delivery_id = %record.id, %reason, "payload could not be rendered");
                return FanoutReport {
                    results: Vec::new(),
                    outcome: AggregateOutcome::Malformed { reason },
                    failures: Vec::new(),
                };
            },
        };

        let pending: Vec<Target> = record.pending_targets().cloned().collect();
        debug!(
            delivery_id = %record.id,
            attempt = record.attempt_count,
            pending = pending.len(),
            total = record.targets.len(),
            "dispatching round"
        );

        let concurrency = self.config.target_concurrency.max(1);
        let dispatched: Vec<_> = stream::iter(pending)
            .map(|target: Target| {
                let request = self.request_for(record, &target, &prepared);
                let dispatcher = Arc::clone(&self.dispatcher);
                async move {
                    let report = dispatcher.attempt(request).await;
                    (target, report)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let attempted_at = self.clock.now_utc();
        let mut results = Vec::with_capacity(dispatched.len());
        let mut failures = Vec::new();
        let mut retry_after: Option<Duration> = None;

        for (target, report) in dispatched {
            if let Some(detail) = &report.error_detail {
                failures.push(format!("{}: {detail}", target.url));
            }
            retry_after = retry_after.max(report.retry_after);
            results.push((
                target.id,
                TargetAttempt {
                    attempt_number: record.attempt_count,
                    generation: record.generation,
                    outcome: report.outcome,
                    http_status: report.http_status,
                    error_detail: report.error_detail,
                    attempted_at,
                    duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
                },
            ));
        }

        let mut tally = TargetTally { retry_after, ..TargetTally::default() };
        for target in &record.targets {
            let latest = results
                .iter()
                .find(|(id, _)| *id == target.id)
                .map(|(_, attempt)| attempt.outcome)
                .or_else(|| record.latest_result(target.id).map(|a| a.outcome));

            match latest {
                Some(TargetOutcome::Delivered) => tally.delivered += 1,
                Some(TargetOutcome::RejectedPermanent) => tally.rejected_permanent += 1,
                // A target with no result yet counts as retryable.
                Some(TargetOutcome::RejectedTransient) | None => tally.rejected_transient += 1,
            }
        }

        FanoutReport { results, outcome: AggregateOutcome::Dispatched(tally), failures }
    }

    fn prepare(&self, record: &DeliveryRecord) -> Result<PreparedPayload, String> {
        match &record.payload {
            Payload::Raw { body, content_type, event_type } => Ok(PreparedPayload::Raw {
                body: Bytes::from(body.clone()),
                content_type: content_type.clone(),
                event_type: event_type.clone(),
            }),
            Payload::Template { template, context, format } => self
                .renderer
                .render(template, context, *format)
                .map(|content| PreparedPayload::Message { content, format: format.as_str() })
                .map_err(|e| e.to_string()),
        }
    }

    fn request_for(
        &self,
        record: &DeliveryRecord,
        target: &Target,
        prepared: &PreparedPayload,
    ) -> DispatchRequest {
        let (body, content_type, event_type) = match prepared {
            PreparedPayload::Raw { body, content_type, event_type } => {
                (body.clone(), content_type.clone(), event_type.clone())
            },
            PreparedPayload::Message { content, format } => (
                self.envelope(record, target, content, format),
                "application/json".to_string(),
                Some("message".to_string()),
            ),
        };

        DispatchRequest {
            delivery_id: record.id,
            target: target.clone(),
            body,
            content_type,
            event_type,
            attempt_number: record.attempt_count,
            timeout: self.config.request_timeout,
        }
    }

    fn envelope(&self, record: &DeliveryRecord, target: &Target, content: &str, format: &str) -> Bytes {
        let mut metadata: Map<String, Value> = record.metadata.clone();
        for (key, value) in &target.metadata {
            metadata.insert(key.clone(), Value::String(value.clone()));
        }

        let mut envelope = json!({
            "delivery_id": record.id,
            "event_type": "message",
            "content": content,
            "format": format,
            "metadata": metadata,
            "timestamp": self.clock.now_utc().to_rfc3339(),
        });
        if let (Some(client_id), Some(fields)) = (&target.client_id, envelope.as_object_mut()) {
            fields.insert("client_id".to_string(), Value::String(client_id.clone()));
        }

        Bytes::from(envelope.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use outbound_core::{ContentFormat, NewDelivery, TargetSpec, TestClock};

    use super::*;
    use crate::dispatcher::DispatchReport;

    /// Dispatcher answering per URL, recording every request.
    #[derive(Debug, Default)]
    struct StubDispatcher {
        outcomes: HashMap<String, TargetOutcome>,
        seen: Mutex<Vec<DispatchRequest>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StubDispatcher {
        fn with(outcomes: &[(&str, TargetOutcome)]) -> Self {
            Self {
                outcomes: outcomes.iter().map(|(u, o)| ((*u).to_string(), *o)).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<DispatchRequest> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Dispatcher for StubDispatcher {
        async fn attempt(&self, request: DispatchRequest) -> DispatchReport {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let outcome =
                self.outcomes.get(&request.target.url).copied().unwrap_or(TargetOutcome::Delivered);
            self.seen.lock().expect("lock").push(request);
            match outcome {
                TargetOutcome::Delivered => DispatchReport::delivered(200, Duration::ZERO),
                TargetOutcome::RejectedPermanent => {
                    DispatchReport::rejected(outcome, Some(404), "HTTP 404", Duration::ZERO)
                },
                TargetOutcome::RejectedTransient => {
                    DispatchReport::rejected(outcome, Some(503), "HTTP 503", Duration::ZERO)
                        .with_retry_after(Duration::from_secs(30))
                },
            }
        }
    }

    fn coordinator(dispatcher: Arc<StubDispatcher>, concurrency: usize) -> FanoutCoordinator {
        FanoutCoordinator::new(
            dispatcher,
            Arc::new(TemplateRenderer::new()),
            Arc::new(TestClock::new()),
            FanoutConfig { target_concurrency: concurrency, request_timeout: Duration::from_secs(5) },
        )
    }

    fn record(payload: Payload, urls: &[&str]) -> DeliveryRecord {
        let request = NewDelivery {
            kind: payload.kind(),
            targets: urls.iter().map(|u| TargetSpec::url(*u)).collect(),
            payload,
            metadata: Map::new(),
            max_attempts: None,
        };
        let targets = urls.iter().map(|u| Target::new(*u)).collect();
        let mut record = DeliveryRecord::new(request, targets, 3, TestClock::new().now_utc());
        record.attempt_count = 1;
        record
    }

    fn raw() -> Payload {
        Payload::Raw {
            body: r#"{"id":1}"#.to_string(),
            content_type: "application/json".to_string(),
            event_type: Some("order.created".to_string()),
        }
    }

    #[tokio::test]
    async fn all_delivered_is_succeeded() {
        let dispatcher = Arc::new(StubDispatcher::default());
        let record = record(raw(), &["https://a.test/hook", "https://b.test/hook"]);

        let report = coordinator(dispatcher.clone(), 4).process(&record).await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.outcome.status(), DeliveryStatus::Succeeded);
        assert_eq!(report.failure_summary(), None);
        assert!(dispatcher.calls().iter().all(|r| r.body == Bytes::from(r#"{"id":1}"#)));
    }

    #[tokio::test]
    async fn rounds_run_on_spawned_tasks() {
        let dispatcher = Arc::new(StubDispatcher::default());
        let coordinator = Arc::new(coordinator(dispatcher.clone(), 2));
        let record = record(raw(), &["https://a.test/hook", "https://b.test/hook"]);

        let mut tasks = tokio::task::JoinSet::new();
        tasks.spawn(async move { coordinator.process(&record).await });
        let report = tasks.join_next().await.expect("one task").expect("task completes");

        assert_eq!(report.outcome.status(), DeliveryStatus::Succeeded);
        assert_eq!(dispatcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn mixed_outcomes_are_partially_failed() {
        let dispatcher = Arc::new(StubDispatcher::with(&[
            ("https://b.test/hook", TargetOutcome::RejectedPermanent),
            ("https://c.test/hook", TargetOutcome::RejectedTransient),
        ]));
        let record =
            record(raw(), &["https://a.test/hook", "https://b.test/hook", "https://c.test/hook"]);

        let report = coordinator(dispatcher, 4).process(&record).await;

        let AggregateOutcome::Dispatched(tally) = &report.outcome else {
            panic!("expected dispatched outcome");
        };
        assert_eq!((tally.delivered, tally.rejected_permanent, tally.rejected_transient), (1, 1, 1));
        assert_eq!(tally.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(report.outcome.status(), DeliveryStatus::PartiallyFailed);
        let summary = report.failure_summary().expect("failures summarized");
        assert!(summary.contains("b.test") && summary.contains("c.test"));
    }

    #[tokio::test]
    async fn delivered_targets_are_skipped_but_counted() {
        let dispatcher = Arc::new(StubDispatcher::default());
        let mut record = record(raw(), &["https://a.test/hook", "https://b.test/hook"]);
        let delivered = record.targets[0].id;
        record.per_target_results.insert(
            delivered,
            vec![TargetAttempt {
                attempt_number: 1,
                generation: 0,
                outcome: TargetOutcome::Delivered,
                http_status: Some(200),
                error_detail: None,
                attempted_at: record.created_at,
                duration_ms: 1,
            }],
        );
        record.attempt_count = 2;

        let report = coordinator(dispatcher.clone(), 4).process(&record).await;

        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target.url, "https://b.test/hook");
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].1.attempt_number, 2);
        assert_eq!(report.outcome.status(), DeliveryStatus::Succeeded);
    }

    #[tokio::test]
    async fn malformed_template_dispatches_nothing() {
        let dispatcher = Arc::new(StubDispatcher::default());
        let payload = Payload::Template {
            template: "Hi {{ undefined_var }}".to_string(),
            context: json!({}),
            format: ContentFormat::Text,
        };
        let record = record(payload, &["https://a.test/hook"]);

        let report = coordinator(dispatcher.clone(), 4).process(&record).await;

        assert!(dispatcher.calls().is_empty());
        assert!(report.results.is_empty());
        assert!(matches!(report.outcome, AggregateOutcome::Malformed { .. }));
        assert_eq!(report.outcome.status(), DeliveryStatus::Failed);
        assert!(report.failure_summary().is_some());
    }

    #[tokio::test]
    async fn message_envelope_merges_target_metadata() {
        let dispatcher = Arc::new(StubDispatcher::default());
        let payload = Payload::Template {
            template: "Hello {{ name }}".to_string(),
            context: json!({"name": "Ada"}),
            format: ContentFormat::Text,
        };
        let mut record = record(payload, &["https://a.test/hook"]);
        record.metadata.insert("source".to_string(), json!("billing"));
        record.metadata.insert("channel".to_string(), json!("default"));
        record.targets[0].metadata.insert("channel".to_string(), "sms".to_string());
        record.targets[0].client_id = Some("acme".to_string());

        coordinator(dispatcher.clone(), 4).process(&record).await;

        let calls = dispatcher.calls();
        assert_eq!(calls[0].event_type.as_deref(), Some("message"));
        let envelope: Value = serde_json::from_slice(&calls[0].body).expect("JSON envelope");
        assert_eq!(envelope["delivery_id"], json!(record.id));
        assert_eq!(envelope["event_type"], "message");
        assert_eq!(envelope["content"], "Hello Ada");
        assert_eq!(envelope["format"], "text");
        assert_eq!(envelope["metadata"], json!({"source": "billing", "channel": "sms"}));
        assert_eq!(envelope["client_id"], "acme");
        assert!(envelope["timestamp"].is_string());
    }

    #[tokio::test]
    async fn concurrency_is_bounded_per_record() {
        let dispatcher = Arc::new(StubDispatcher::default());
        let urls: Vec<String> = (0..12).map(|i| format!("https://t{i}.test/hook")).collect();
        let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let record = record(raw(), &url_refs);

        let report = coordinator(dispatcher.clone(), 3).process(&record).await;

        assert_eq!(report.results.len(), 12);
        assert!(dispatcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn status_from_tally() {
        let tally = |d, p, t| {
            AggregateOutcome::Dispatched(TargetTally {
                delivered: d,
                rejected_permanent: p,
                rejected_transient: t,
                retry_after: None,
            })
        };
        assert_eq!(tally(2, 0, 0).status(), DeliveryStatus::Succeeded);
        assert_eq!(tally(0, 1, 1).status(), DeliveryStatus::Failed);
        assert_eq!(tally(1, 0, 1).status(), DeliveryStatus::PartiallyFailed);
    }
}
