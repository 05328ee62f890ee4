//! Health check handlers for service monitoring.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use outbound_delivery::EngineStats;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service health
    pub status: HealthStatus,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Per-component results
    pub checks: HealthChecks,
    /// Engine counters
    pub engine: EngineHealth,
    /// Service version
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Store is up but no workers are running
    Degraded,
    /// Store unreachable
    Unhealthy,
}

/// Individual component results.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    /// Delivery store reachability
    pub store: ComponentHealth,
}

/// Health of one component.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Error message if down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub response_time_ms: u64,
}

/// Component-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is failing
    Down,
}

/// Worker and throughput summary.
#[derive(Debug, Serialize, Deserialize)]
pub struct EngineHealth {
    /// Whether workers are running
    pub running: bool,
    /// Counters since startup
    pub stats: EngineStats,
}

/// Checks the store and reports engine counters.
///
/// Answers 503 when the store is unreachable. A reachable store with no
/// running workers is reported as degraded but still answers 200.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let timestamp = state.clock.now_utc();
    let started = state.clock.now();

    let store = match state.engine.health_check().await {
        Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None, response_time_ms: 0 },
        Err(e) => {
            error!(error = %e, "store health check failed");
            ComponentHealth {
                status: ComponentStatus::Down,
                message: Some(e.to_string()),
                response_time_ms: 0,
            }
        },
    };
    let store = ComponentHealth {
        response_time_ms: u64::try_from(state.clock.now().duration_since(started).as_millis())
            .unwrap_or(u64::MAX),
        ..store
    };

    let running = state.engine.is_running().await;
    let status = match (store.status, running) {
        (ComponentStatus::Down, _) => HealthStatus::Unhealthy,
        (ComponentStatus::Up, false) => HealthStatus::Degraded,
        (ComponentStatus::Up, true) => HealthStatus::Healthy,
    };

    let response = HealthResponse {
        status,
        timestamp,
        checks: HealthChecks { store },
        engine: EngineHealth { running, stats: state.engine.stats().await },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, running, "health check completed");
    (status_code, Json(response)).into_response()
}

/// Liveness probe. Does not touch the store.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "outbound",
    });

    (StatusCode::OK, Json(response)).into_response()
}
