//! Wired-up engine for integration tests.
//!
//! [`TestEnv`] bundles a virtual clock, an in-memory store, a registry, a
//! recording audit sink and a mock HTTP server behind one engine. Tests
//! drive rounds explicitly with [`TestEnv::run_until_terminal`] instead of
//! starting workers, so every run is deterministic.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use outbound_core::{
    Clock, DeliveryId, DeliveryRecord, NewDelivery, RegistryEntry, StaticRegistry, TestClock,
};
use outbound_delivery::{
    dispatcher::Dispatcher, retry::RetryPolicy, storage::memory::InMemoryDeliveryStore,
    DeliveryConfig, DeliveryEngine,
};

use crate::{events::RecordingEventHandler, http::MockServer};

/// Test environment with a fully wired engine.
pub struct TestEnv {
    /// Virtual clock shared with the engine.
    pub clock: TestClock,
    /// Store behind the engine.
    pub store: Arc<InMemoryDeliveryStore>,
    /// Client registry behind the engine.
    pub registry: Arc<StaticRegistry>,
    /// Audit sink.
    pub events: Arc<RecordingEventHandler>,
    /// Mock targets.
    pub http_mock: MockServer,
    /// Engine under test.
    pub engine: Arc<DeliveryEngine>,
}

impl TestEnv {
    /// Environment with default settings, dispatching over real HTTP to the
    /// mock server.
    pub async fn new() -> Result<Self> {
        Self::builder().build().await
    }

    /// Starts configuring an environment.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::default()
    }

    /// URL of a path on the mock server.
    pub fn target_url(&self, path: &str) -> String {
        self.http_mock.target_url(path)
    }

    /// Registers a client pointing at a mock server path.
    pub async fn register_client(&self, client_id: &str, path: &str) -> Result<()> {
        self.registry
            .register(RegistryEntry::new(client_id, self.target_url(path)))
            .await
            .context("failed to register client")
    }

    /// Enqueues a request through the engine.
    pub async fn enqueue(&self, request: NewDelivery) -> Result<DeliveryId> {
        Ok(self.engine.enqueue(request).await?)
    }

    /// Current state of a record.
    pub async fn record(&self, id: DeliveryId) -> Result<DeliveryRecord> {
        Ok(self.engine.get_status(id).await?)
    }

    /// Advances virtual time.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Runs rounds until the record is terminal, jumping the clock to each
    /// re-arm time.
    ///
    /// # Errors
    ///
    /// Fails if the record is still live after `max_rounds` claims.
    pub async fn run_until_terminal(
        &self,
        id: DeliveryId,
        max_rounds: usize,
    ) -> Result<DeliveryRecord> {
        let mut rounds = 0;
        loop {
            let record = self.record(id).await?;
            if record.is_terminal() {
                self.engine.flush_events().await;
                return Ok(record);
            }
            if rounds >= max_rounds {
                bail!("delivery {id} still {} after {rounds} rounds", record.status);
            }

            self.clock.advance_to(record.next_attempt_at);
            if self.engine.process_due().await? > 0 {
                rounds += 1;
            }
        }
    }
}

/// Builder for [`TestEnv`].
pub struct TestEnvBuilder {
    config: DeliveryConfig,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    clients: Vec<(String, String)>,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        let config = DeliveryConfig {
            worker_count: 1,
            default_retry_policy: RetryPolicy {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                ..RetryPolicy::default()
            }
            .without_jitter(),
            ..DeliveryConfig::default()
        };
        Self { config, dispatcher: None, clients: Vec::new() }
    }
}

impl TestEnvBuilder {
    /// Replaces the engine configuration.
    #[must_use]
    pub fn config(mut self, config: DeliveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the default attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.default_retry_policy.max_attempts = max_attempts;
        self
    }

    /// Dispatches through `dispatcher` instead of HTTP.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Registers a client pointing at a mock server path.
    #[must_use]
    pub fn client(mut self, client_id: &str, path: &str) -> Self {
        self.clients.push((client_id.to_string(), path.to_string()));
        self
    }

    /// Builds the environment.
    pub async fn build(self) -> Result<TestEnv> {
        crate::init_test_tracing();

        let http_mock = MockServer::start().await;
        let clock = TestClock::new();
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(InMemoryDeliveryStore::new(clock_arc.clone()));
        let registry = Arc::new(StaticRegistry::new());
        let events = RecordingEventHandler::new();

        for (client_id, path) in &self.clients {
            registry
                .register(RegistryEntry::new(client_id.as_str(), http_mock.target_url(path)))
                .await
                .context("failed to register client")?;
        }

        let engine = match self.dispatcher {
            Some(dispatcher) => DeliveryEngine::with_dispatcher(
                store.clone(),
                registry.clone(),
                dispatcher,
                self.config,
                clock_arc,
                events.clone(),
            ),
            None => DeliveryEngine::with_event_handler(
                store.clone(),
                registry.clone(),
                self.config,
                clock_arc,
                events.clone(),
            )
            .context("failed to create delivery engine")?,
        };

        Ok(TestEnv { clock, store, registry, events, http_mock, engine: Arc::new(engine) })
    }
}
