//! Outbound delivery service.
//!
//! Loads configuration, opens the delivery store, starts the worker pool
//! and serves the HTTP API until SIGINT or SIGTERM. On shutdown the API
//! stops first, then workers finish their current batch and pending audit
//! events are drained.

use std::sync::Arc;

use anyhow::{Context, Result};
use outbound_api::{start_server, AppState, Config};
use outbound_core::{Clock, LoggingEventHandler, RealClock};
use outbound_delivery::{
    storage::{memory::InMemoryDeliveryStore, DeliveryStore},
    DeliveryEngine,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log)?;

    info!(
        host = %config.host,
        port = config.port,
        workers = config.worker_count,
        store = ?config.store_path,
        clients = config.registry.len(),
        "configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let store: Arc<dyn DeliveryStore> = match &config.store_path {
        Some(path) => {
            let store = InMemoryDeliveryStore::open(path, clock.clone())
                .await
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            info!(path = %path.display(), records = store.len().await, "delivery store loaded");
            Arc::new(store)
        },
        None => {
            info!("delivery store is in-memory only");
            Arc::new(InMemoryDeliveryStore::new(clock.clone()))
        },
    };

    let registry = Arc::new(config.to_registry()?);
    let engine = Arc::new(
        DeliveryEngine::with_event_handler(
            store,
            registry,
            config.to_delivery_config(),
            clock.clone(),
            Arc::new(LoggingEventHandler::new()),
        )
        .context("failed to create delivery engine")?,
    );

    engine.start().await.context("failed to start delivery workers")?;

    let addr = config.parse_server_addr()?;
    let state = AppState::new(engine.clone(), clock);
    let served = start_server(state, addr, config.request_timeout()).await;

    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "delivery engine did not shut down cleanly");
    }

    served.context("HTTP server failed")?;
    info!("outbound shutdown complete");
    Ok(())
}

/// Initializes tracing. `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")
}
