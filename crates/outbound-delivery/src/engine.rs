//! The delivery engine: producer API plus worker lifecycle.
//!
//! `DeliveryEngine` is meant to be shared behind an `Arc`. Producers call
//! [`DeliveryEngine::enqueue`]; operators call the query and retry methods;
//! the binary calls [`DeliveryEngine::start`] once and
//! [`DeliveryEngine::shutdown`] on exit.

use std::sync::Arc;

use outbound_core::{
    validate_target_url, Clock, CoreError, DeliveryEvent, DeliveryId, DeliveryRecord,
    DeliveryRetryRequestedEvent, DeliveryStatus, Destination, EventHandler, NewDelivery,
    NoOpEventHandler, Page, PageRequest, Target, TargetId, TargetRegistry, TargetSpec,
};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::{
    client::DeliveryClient,
    dispatcher::Dispatcher,
    error::{DeliveryError, Result},
    fanout::FanoutCoordinator,
    render::TemplateRenderer,
    retry::RetryScheduler,
    storage::DeliveryStore,
    worker::{DeliveryConfig, DeliveryContext, EngineStats},
    worker_pool::WorkerPool,
};

/// Outbound delivery engine.
pub struct DeliveryEngine {
    context: DeliveryContext,
    registry: Arc<dyn TargetRegistry>,
    cancellation_token: CancellationToken,
    worker_pool: Mutex<Option<WorkerPool>>,
}

impl DeliveryEngine {
    /// Creates an engine that dispatches over HTTP and discards audit
    /// events.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be initialized.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        registry: Arc<dyn TargetRegistry>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::with_event_handler(store, registry, config, clock, Arc::new(NoOpEventHandler::new()))
    }

    /// Creates an engine that dispatches over HTTP and sends audit events to
    /// `event_handler`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be initialized.
    pub fn with_event_handler(
        store: Arc<dyn DeliveryStore>,
        registry: Arc<dyn TargetRegistry>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.client_config.clone(), clock.clone())?);
        Ok(Self::with_dispatcher(store, registry, client, config, clock, event_handler))
    }

    /// Creates an engine with an injected dispatcher.
    pub fn with_dispatcher(
        store: Arc<dyn DeliveryStore>,
        registry: Arc<dyn TargetRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        let coordinator = Arc::new(FanoutCoordinator::new(
            dispatcher,
            Arc::new(TemplateRenderer::new()),
            clock.clone(),
            config.fanout_config(),
        ));
        let scheduler = Arc::new(RetryScheduler::new(config.default_retry_policy.clone()));

        let context = DeliveryContext {
            store,
            coordinator,
            scheduler,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            event_handler,
            audit_tasks: TaskTracker::new(),
            wake: Arc::new(Notify::new()),
            clock,
            config,
        };

        Self {
            context,
            registry,
            cancellation_token: CancellationToken::new(),
            worker_pool: Mutex::new(None),
        }
    }

    /// Validates a request, resolves its targets, and stores it as pending.
    ///
    /// Client-id targets are resolved through the registry now; the stored
    /// record keeps the URL even if the registry changes later.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for malformed requests and unknown or inactive
    ///   clients
    /// - `StoreUnavailable` if the record could not be stored
    pub async fn enqueue(&self, request: NewDelivery) -> Result<DeliveryId> {
        request.validate()?;
        let targets = self.resolve_targets(&request.targets).await?;

        let record = DeliveryRecord::new(
            request,
            targets,
            self.context.config.default_retry_policy.max_attempts,
            self.context.clock.now_utc(),
        );
        let kind = record.kind;
        let target_count = record.targets.len();

        let id = self.context.store.enqueue(record).await?;
        self.context.wake.notify_one();

        info!(delivery_id = %id, %kind, targets = target_count, "delivery enqueued");
        Ok(id)
    }

    async fn resolve_targets(&self, specs: &[TargetSpec]) -> Result<Vec<Target>> {
        let mut targets = Vec::with_capacity(specs.len());
        for spec in specs {
            let (url, client_id) = match &spec.destination {
                Destination::Url(url) => (url.clone(), None),
                Destination::ClientId(client_id) => {
                    let url = self.registry.resolve(client_id).await.map_err(|e| match e {
                        CoreError::NotFound(message) => {
                            DeliveryError::invalid_input(format!("unknown target {message}"))
                        },
                        other => other.into(),
                    })?;
                    validate_target_url(&url)?;
                    (url, Some(client_id.clone()))
                },
            };
            targets.push(Target {
                id: TargetId::new(),
                url,
                client_id,
                metadata: spec.metadata.clone(),
            });
        }
        Ok(targets)
    }

    /// Reads the current state of a record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn get_status(&self, id: DeliveryId) -> Result<DeliveryRecord> {
        Ok(self.context.store.find(id).await?)
    }

    /// Lists records in a status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store cannot be read.
    pub async fn list_by_status(
        &self,
        status: DeliveryStatus,
        page: PageRequest,
    ) -> Result<Page<DeliveryRecord>> {
        Ok(self.context.store.list_by_status(status, page).await?)
    }

    /// Puts a failed or dead-lettered record back in the queue with a fresh
    /// attempt budget. Targets already delivered are not dispatched again.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown ids
    /// - `InvalidTransition` from any status other than `Failed` or
    ///   `DeadLettered`
    pub async fn retry(&self, id: DeliveryId) -> Result<DeliveryRecord> {
        let previous_status = self.context.store.find(id).await?.status;
        let record = self.context.store.requeue(id).await?;

        self.context.publish(DeliveryEvent::RetryRequested(DeliveryRetryRequestedEvent {
            delivery_id: id,
            previous_status,
            requested_at: record.updated_at,
        }));
        self.context.wake.notify_one();

        info!(delivery_id = %id, %previous_status, "manual retry accepted");
        Ok(record)
    }

    /// Runs one claim-and-process cycle inline.
    ///
    /// Intended for tests and controlled batch runs; does not need
    /// [`Self::start`]. Returns the number of records claimed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the claim fails.
    pub async fn process_due(&self) -> Result<usize> {
        self.context.process_batch(0).await
    }

    /// Spawns the worker pool.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the engine is already running or has
    /// been shut down.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.worker_pool.lock().await;
        if slot.is_some() {
            return Err(DeliveryError::configuration("delivery engine already started"));
        }
        if self.cancellation_token.is_cancelled() {
            return Err(DeliveryError::configuration("delivery engine has been shut down"));
        }

        info!(
            worker_count = self.context.config.worker_count,
            batch_size = self.context.config.batch_size,
            poll_interval_seconds = self.context.config.poll_interval.as_secs(),
            "starting delivery engine"
        );

        let mut pool = WorkerPool::new(self.context.clone(), self.cancellation_token.clone());
        pool.spawn_workers().await?;
        *slot = Some(pool);

        info!("delivery engine started");
        Ok(())
    }

    /// Stops the workers after their current batch and drains pending audit
    /// events.
    ///
    /// # Errors
    ///
    /// Returns `WorkerPanic` or `ShutdownTimeout` from the worker pool.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down delivery engine");
        self.cancellation_token.cancel();

        let result = match self.worker_pool.lock().await.take() {
            Some(pool) => pool.shutdown_graceful(self.context.config.shutdown_timeout).await,
            None => {
                info!("delivery engine was not started, shutdown completed immediately");
                Ok(())
            },
        };

        self.context.audit_tasks.close();
        if tokio::time::timeout(self.context.config.shutdown_timeout, self.context.audit_tasks.wait())
            .await
            .is_err()
        {
            warn!(pending = self.context.audit_tasks.len(), "audit events still pending at shutdown");
        }

        result
    }

    /// Returns true while workers are running.
    pub async fn is_running(&self) -> bool {
        self.worker_pool.lock().await.as_ref().is_some_and(WorkerPool::has_active_workers)
    }

    /// Waits for every audit event published so far to be handled.
    pub async fn flush_events(&self) {
        let tracker = &self.context.audit_tasks;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.context.stats.read().await.clone()
    }

    /// Verifies the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if it is not.
    pub async fn health_check(&self) -> Result<()> {
        Ok(self.context.store.health_check().await?)
    }
}
