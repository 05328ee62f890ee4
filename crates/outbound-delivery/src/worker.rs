//! Delivery workers: claim, fan out, schedule, commit.
//!
//! A worker cycle runs `Idle → Claiming → Dispatching → Committing → Idle`.
//! Each claimed record gets its own task in a per-batch `JoinSet`, and the
//! whole batch finishes before the next claim, so a worker never holds more
//! than `batch_size` records. Shutdown is cooperative: cancellation is only
//! observed between batches, never in the middle of a record.

use std::{sync::Arc, time::Duration};

use outbound_core::{
    Clock, CoreError, DeliveryCommit, DeliveryCompletedEvent, DeliveryEvent, DeliveryRecord,
    DeliveryStatus, EventHandler, NextAction,
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Notify, RwLock},
    task::JoinSet,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    client::ClientConfig,
    error::{DeliveryError, Result},
    fanout::{FanoutConfig, FanoutCoordinator},
    retry::{RetryPolicy, RetryScheduler},
    storage::DeliveryStore,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Maximum records to claim per worker cycle.
    pub batch_size: usize,

    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,

    /// How long a claim stays exclusive.
    pub lease_duration: Duration,

    /// Wait after a failed cycle before trying again.
    pub error_backoff: Duration,

    /// Maximum dispatches in flight for one record.
    pub target_concurrency: usize,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Backoff policy, and the attempt budget for records without their own.
    pub default_retry_policy: RetryPolicy,

    /// Maximum time to wait for workers and audit tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(crate::DEFAULT_POLL_INTERVAL_SECONDS),
            lease_duration: Duration::from_secs(crate::DEFAULT_LEASE_SECONDS),
            error_backoff: Duration::from_secs(5),
            target_concurrency: crate::DEFAULT_TARGET_CONCURRENCY,
            client_config: ClientConfig::default(),
            default_retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl DeliveryConfig {
    /// Fan-out settings derived from this configuration.
    pub fn fanout_config(&self) -> FanoutConfig {
        FanoutConfig {
            target_concurrency: self.target_concurrency,
            request_timeout: self.client_config.timeout,
        }
    }
}

/// Counters for engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Number of running workers.
    pub active_workers: usize,
    /// Records claimed since startup.
    pub records_claimed: u64,
    /// Records currently being processed.
    pub in_flight_records: u64,
    /// Individual target dispatches made.
    pub dispatches: u64,
    /// Records finalized as succeeded.
    pub succeeded: u64,
    /// Records finalized as partially failed.
    pub partially_failed: u64,
    /// Records finalized as failed.
    pub failed: u64,
    /// Records finalized as dead-lettered.
    pub dead_lettered: u64,
    /// Rounds that ended in a re-arm.
    pub rearmed: u64,
    /// Commits dropped because the claim had been lost.
    pub stale_claims: u64,
}

/// Everything a worker needs, shared by all workers of an engine.
#[derive(Clone)]
pub struct DeliveryContext {
    pub(crate) store: Arc<dyn DeliveryStore>,
    pub(crate) coordinator: Arc<FanoutCoordinator>,
    pub(crate) scheduler: Arc<RetryScheduler>,
    pub(crate) stats: Arc<RwLock<EngineStats>>,
    pub(crate) event_handler: Arc<dyn EventHandler>,
    pub(crate) audit_tasks: TaskTracker,
    pub(crate) wake: Arc<Notify>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: DeliveryConfig,
}

impl DeliveryContext {
    /// Claims one batch and processes every record in it.
    ///
    /// Returns the number of records claimed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the claim itself fails. Failures of
    /// individual records are logged and do not fail the batch.
    pub async fn process_batch(&self, worker_id: usize) -> Result<usize> {
        let records =
            self.store.claim_due(self.config.batch_size, self.config.lease_duration).await?;
        let claimed = records.len();
        if claimed == 0 {
            return Ok(0);
        }

        debug!(worker_id, claimed, "claimed delivery batch");
        {
            let mut stats = self.stats.write().await;
            stats.records_claimed += claimed as u64;
            stats.in_flight_records += claimed as u64;
        }

        let mut tasks = JoinSet::new();
        for record in records {
            let context = self.clone();
            tasks.spawn(async move {
                let id = record.id;
                (id, context.process_record(record).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            self.stats.write().await.in_flight_records -= 1;
            match joined {
                Ok((_, Ok(()))) => {},
                Ok((delivery_id, Err(error))) => {
                    error!(worker_id, %delivery_id, error = %error, "delivery round failed");
                },
                Err(join_error) => {
                    error!(worker_id, error = %join_error, "delivery task panicked");
                },
            }
        }

        Ok(claimed)
    }

    /// Runs one round for a claimed record and commits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails for any reason other than a lost
    /// claim. The record is then recovered when its lease expires.
    pub async fn process_record(&self, record: DeliveryRecord) -> Result<()> {
        let token = record.claim_token.ok_or_else(|| {
            DeliveryError::internal(format!("record {} claimed without a token", record.id))
        })?;

        let report = self.coordinator.process(&record).await;
        let action = self.scheduler.next_action(&record, &report.outcome, self.clock.now_utc());
        let dispatched = report.results.len() as u64;

        let commit = DeliveryCommit {
            last_error: report.failure_summary(),
            results: report.results,
            action,
        };

        match self.store.commit_result(record.id, token, commit).await {
            Ok(updated) => {
                self.record_commit(&updated, action, dispatched).await;
                if updated.is_terminal() {
                    self.publish(DeliveryEvent::Completed(DeliveryCompletedEvent::from_record(
                        &updated,
                    )));
                }
                Ok(())
            },
            Err(CoreError::StaleClaim(delivery_id)) => {
                debug!(%delivery_id, "discarding results of a stale claim");
                self.stats.write().await.stale_claims += 1;
                Ok(())
            },
            Err(error) => Err(error.into()),
        }
    }

    async fn record_commit(&self, record: &DeliveryRecord, action: NextAction, dispatched: u64) {
        let mut stats = self.stats.write().await;
        stats.dispatches += dispatched;
        match action {
            NextAction::Rearm { next_attempt_at } => {
                stats.rearmed += 1;
                info!(
                    delivery_id = %record.id,
                    attempt = record.attempt_count,
                    max_attempts = record.max_attempts,
                    %next_attempt_at,
                    "delivery re-armed"
                );
            },
            NextAction::Finalize(status) => {
                match status {
                    DeliveryStatus::Succeeded => stats.succeeded += 1,
                    DeliveryStatus::PartiallyFailed => stats.partially_failed += 1,
                    DeliveryStatus::Failed => stats.failed += 1,
                    DeliveryStatus::DeadLettered => stats.dead_lettered += 1,
                    DeliveryStatus::Pending | DeliveryStatus::Claimed => {},
                }
                info!(
                    delivery_id = %record.id,
                    attempt = record.attempt_count,
                    status = %status,
                    "delivery finalized"
                );
            },
        }
    }

    /// Hands an event to the audit sink without waiting for it.
    pub(crate) fn publish(&self, event: DeliveryEvent) {
        let handler = self.event_handler.clone();
        self.audit_tasks.spawn(async move {
            handler.handle_event(event).await;
        });
    }
}

/// Worker that claims and processes records until cancelled.
pub struct DeliveryWorker {
    id: usize,
    context: DeliveryContext,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    /// Creates a worker.
    pub fn new(id: usize, context: DeliveryContext, cancellation_token: CancellationToken) -> Self {
        Self { id, context, cancellation_token }
    }

    /// Main worker loop.
    ///
    /// After a non-empty batch the worker claims again immediately.
    /// Otherwise it waits for the poll interval, an enqueue wake-up, or
    /// cancellation, whichever comes first.
    ///
    /// # Errors
    ///
    /// Never fails today; batch errors are logged and retried after
    /// `error_backoff`.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "delivery worker received shutdown signal");
                break;
            }

            match self.context.process_batch(self.id).await {
                Ok(0) => {
                    tokio::select! {
                        () = self.context.clock.sleep(self.context.config.poll_interval) => {},
                        () = self.context.wake.notified() => {
                            debug!(worker_id = self.id, "woken by enqueue");
                        },
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(_) => {},
                Err(error) => {
                    warn!(
                        worker_id = self.id,
                        error = %error,
                        "worker cycle failed, backing off"
                    );
                    tokio::select! {
                        () = self.context.clock.sleep(self.context.config.error_backoff) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }
}
