//! HTTP surface and configuration for the outbound delivery service.
//!
//! The router exposes the engine's producer and operator operations:
//!
//! ```text
//! POST /deliveries              enqueue
//! GET  /deliveries?status=...   list by status, paginated
//! GET  /deliveries/{id}         status of one record
//! POST /deliveries/{id}/retry   manual retry of a failed record
//! GET  /health                  store and worker health
//! GET  /live                    liveness
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use outbound_core::Clock;
use outbound_delivery::DeliveryEngine;

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, serve, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Delivery engine.
    pub engine: Arc<DeliveryEngine>,
    /// Clock used for response timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates handler state.
    pub fn new(engine: Arc<DeliveryEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }
}
