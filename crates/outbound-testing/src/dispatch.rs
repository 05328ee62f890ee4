//! Dispatcher that answers from a script instead of the network.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use outbound_core::{DeliveryId, TargetOutcome};
use outbound_delivery::dispatcher::{DispatchReport, DispatchRequest, Dispatcher};

/// One call seen by a [`ScriptedDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchCall {
    /// Record being delivered.
    pub delivery_id: DeliveryId,
    /// Target URL.
    pub url: String,
    /// Record attempt number.
    pub attempt_number: u32,
    /// Body that would have been sent.
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<DispatchReport>>,
    calls: Vec<DispatchCall>,
}

/// In-process dispatcher driven by per-URL scripts.
///
/// Each URL answers from its queue in order; once the queue is empty every
/// further attempt is delivered with a 200.
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    script: Mutex<Script>,
}

impl ScriptedDispatcher {
    /// Creates a dispatcher that delivers everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a report for the next attempt against `url`.
    pub fn push(&self, url: &str, report: DispatchReport) {
        if let Ok(mut script) = self.script.lock() {
            script.queued.entry(url.to_string()).or_default().push_back(report);
        }
    }

    /// Queues a status code response for the next attempt against `url`.
    pub fn push_status(&self, url: &str, status: u16) {
        let report = match outbound_delivery::dispatcher::classify_status(status) {
            TargetOutcome::Delivered => DispatchReport::delivered(status, Duration::ZERO),
            outcome => DispatchReport::rejected(
                outcome,
                Some(status),
                format!("HTTP {status}"),
                Duration::ZERO,
            ),
        };
        self.push(url, report);
    }

    /// Queues `count` transient connection failures for `url`.
    pub fn push_connect_failures(&self, url: &str, count: usize) {
        for _ in 0..count {
            self.push(
                url,
                DispatchReport::rejected(
                    TargetOutcome::RejectedTransient,
                    None,
                    "connection refused",
                    Duration::ZERO,
                ),
            );
        }
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<DispatchCall> {
        self.script.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Calls made against one URL.
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.url == url).count()
    }
}

#[async_trait::async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn attempt(&self, request: DispatchRequest) -> DispatchReport {
        let Ok(mut script) = self.script.lock() else {
            return DispatchReport::rejected(
                TargetOutcome::RejectedTransient,
                None,
                "script poisoned",
                Duration::ZERO,
            );
        };

        script.calls.push(DispatchCall {
            delivery_id: request.delivery_id,
            url: request.target.url.clone(),
            attempt_number: request.attempt_number,
            body: request.body.to_vec(),
        });

        script
            .queued
            .get_mut(&request.target.url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| DispatchReport::delivered(200, Duration::ZERO))
    }
}
