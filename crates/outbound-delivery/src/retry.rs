//! Backoff policy and the per-round scheduling decision.
//!
//! After each round the scheduler looks at the aggregate outcome and the
//! record's attempt budget and either finalizes the record or re-arms it for
//! a later claim. Waiting happens in the store, not in a sleeping task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use outbound_core::{DeliveryRecord, DeliveryStatus, NextAction};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::fanout::AggregateOutcome;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt budget for records that do not set their own.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound on any delay, including Retry-After hints.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied symmetrically.
    pub jitter_factor: f64,

    /// How delays grow with the attempt number.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.1,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// Delay doubles each attempt.
    Exponential,
    /// Delay grows by `base_delay` each attempt.
    Linear,
}

impl RetryPolicy {
    /// Policy without jitter, for deterministic schedules.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay after attempt number `attempt` (1-based), before jitter.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt.max(1)),
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };
        delay.min(self.max_delay)
    }

    /// Delay after attempt `attempt`, with jitter and an optional
    /// server-requested minimum, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jittered = apply_jitter(self.backoff_delay(attempt), self.jitter_factor);
        jittered.max(retry_after.unwrap_or_default()).min(self.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + jitter_offset).max(0.0))
}

/// Decides what happens to a record after a round.
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    /// Creates a scheduler with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the scheduler's policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Chooses between finalizing and re-arming.
    ///
    /// Uses the record's own `attempt_count` (the round just run) and
    /// `max_attempts`.
    pub fn next_action(
        &self,
        record: &DeliveryRecord,
        outcome: &AggregateOutcome,
        now: DateTime<Utc>,
    ) -> NextAction {
        let tally = match outcome {
            AggregateOutcome::Malformed { .. } => {
                return NextAction::Finalize(DeliveryStatus::Failed)
            },
            AggregateOutcome::Dispatched(tally) => tally,
        };

        if outcome.status() == DeliveryStatus::Succeeded {
            return NextAction::Finalize(DeliveryStatus::Succeeded);
        }

        if !tally.has_transient() {
            return NextAction::Finalize(outcome.status());
        }

        if record.attempt_count >= record.max_attempts {
            return NextAction::Finalize(DeliveryStatus::DeadLettered);
        }

        let delay = self.policy.delay_for(record.attempt_count, tally.retry_after);
        match chrono::Duration::from_std(delay) {
            Ok(delay) => NextAction::Rearm { next_attempt_at: now + delay },
            Err(_) => NextAction::Rearm { next_attempt_at: now + chrono::Duration::days(1) },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use outbound_core::{NewDelivery, Payload, Target, TargetSpec};
    use proptest::prelude::*;

    use super::*;
    use crate::fanout::TargetTally;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(100),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    fn record(attempt_count: u32, max_attempts: u32) -> DeliveryRecord {
        let request = NewDelivery {
            kind: outbound_core::DeliveryKind::WebhookEvent,
            targets: vec![TargetSpec::url("https://a.test/hook")],
            payload: Payload::Raw {
                body: "{}".to_string(),
                content_type: "application/json".to_string(),
                event_type: None,
            },
            metadata: serde_json::Map::new(),
            max_attempts: Some(max_attempts),
        };
        let mut record =
            DeliveryRecord::new(request, vec![Target::new("https://a.test/hook")], 3, now());
        record.attempt_count = attempt_count;
        record
    }

    fn dispatched(delivered: usize, permanent: usize, transient: usize) -> AggregateOutcome {
        AggregateOutcome::Dispatched(TargetTally {
            delivered,
            rejected_permanent: permanent,
            rejected_transient: transient,
            retry_after: None,
        })
    }

    #[test]
    fn exponential_backoff_doubles_then_caps() {
        let policy = policy();
        let delays: Vec<_> = (1..=6).map(|a| policy.backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 100, 100]);
    }

    #[test]
    fn fixed_and_linear_strategies() {
        let fixed = RetryPolicy { backoff_strategy: BackoffStrategy::Fixed, ..policy() };
        assert_eq!(fixed.backoff_delay(5), Duration::from_secs(10));

        let linear = RetryPolicy { backoff_strategy: BackoffStrategy::Linear, ..policy() };
        assert_eq!(linear.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(linear.backoff_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let jittery = RetryPolicy { jitter_factor: 0.25, ..policy() };
        for _ in 0..100 {
            let delay = jittery.delay_for(1, None);
            assert!(delay >= Duration::from_millis(7_500) && delay <= Duration::from_millis(12_500));
        }
        for _ in 0..100 {
            assert!(jittery.delay_for(10, None) <= jittery.max_delay);
        }
    }

    #[test]
    fn retry_after_raises_delay_but_is_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(45))), Duration::from_secs(45));
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(1))), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(9_999))), Duration::from_secs(100));
    }

    #[test]
    fn success_and_malformed_finalize() {
        let scheduler = RetryScheduler::new(policy());
        assert_eq!(
            scheduler.next_action(&record(1, 3), &dispatched(2, 0, 0), now()),
            NextAction::Finalize(DeliveryStatus::Succeeded)
        );
        assert_eq!(
            scheduler.next_action(
                &record(1, 3),
                &AggregateOutcome::Malformed { reason: "undefined value".to_string() },
                now()
            ),
            NextAction::Finalize(DeliveryStatus::Failed)
        );
    }

    #[test]
    fn permanent_only_failures_finalize_without_retry() {
        let scheduler = RetryScheduler::new(policy());
        assert_eq!(
            scheduler.next_action(&record(1, 3), &dispatched(0, 2, 0), now()),
            NextAction::Finalize(DeliveryStatus::Failed)
        );
        assert_eq!(
            scheduler.next_action(&record(1, 3), &dispatched(1, 1, 0), now()),
            NextAction::Finalize(DeliveryStatus::PartiallyFailed)
        );
    }

    #[test]
    fn transient_failures_rearm_until_budget_exhausted() {
        let scheduler = RetryScheduler::new(policy());
        assert_eq!(
            scheduler.next_action(&record(1, 3), &dispatched(1, 0, 1), now()),
            NextAction::Rearm { next_attempt_at: now() + chrono::Duration::seconds(10) }
        );
        assert_eq!(
            scheduler.next_action(&record(2, 3), &dispatched(0, 0, 1), now()),
            NextAction::Rearm { next_attempt_at: now() + chrono::Duration::seconds(20) }
        );
        assert_eq!(
            scheduler.next_action(&record(3, 3), &dispatched(0, 0, 1), now()),
            NextAction::Finalize(DeliveryStatus::DeadLettered)
        );
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_up_to_cap(
            base_ms in 1u64..10_000,
            cap_factor in 1u64..1_000,
            attempt in 1u32..64,
        ) {
            for strategy in [BackoffStrategy::Fixed, BackoffStrategy::Linear, BackoffStrategy::Exponential] {
                let policy = RetryPolicy {
                    max_attempts: 10,
                    base_delay: Duration::from_millis(base_ms),
                    max_delay: Duration::from_millis(base_ms * cap_factor),
                    jitter_factor: 0.0,
                    backoff_strategy: strategy,
                };
                let current = policy.backoff_delay(attempt);
                let next = policy.backoff_delay(attempt + 1);
                prop_assert!(current <= next);
                prop_assert!(next <= policy.max_delay);
            }
        }
    }
}
