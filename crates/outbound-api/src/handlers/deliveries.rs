//! Delivery endpoints: enqueue, status, listing and manual retry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use outbound_core::{
    DeliveryId, DeliveryKind, DeliveryRecord, DeliveryStatus, NewDelivery, Page, PageRequest,
    TargetSummary,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::error_response;
use crate::AppState;

/// Response to a successful enqueue.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    /// Identifier of the new record
    pub delivery_id: DeliveryId,
    /// Always `pending`
    pub status: DeliveryStatus,
}

/// Public view of a delivery record.
///
/// Omits the payload and the claim token.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryView {
    /// Record identity
    pub id: DeliveryId,
    /// Kind of work
    pub kind: DeliveryKind,
    /// Lifecycle state
    pub status: DeliveryStatus,
    /// Claims consumed
    pub attempt_count: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Earliest next claim for live records
    pub next_attempt_at: DateTime<Utc>,
    /// Failure summary of the most recent round
    pub last_error: Option<String>,
    /// Per-target state
    pub targets: Vec<TargetSummary>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
    /// Terminal status time
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&DeliveryRecord> for DeliveryView {
    fn from(record: &DeliveryRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            status: record.status,
            attempt_count: record.attempt_count,
            max_attempts: record.max_attempts,
            next_attempt_at: record.next_attempt_at,
            last_error: record.last_error.clone(),
            targets: TargetSummary::for_record(record),
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
        }
    }
}

/// Query string for listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Status to filter on
    pub status: DeliveryStatus,
    /// Records to skip
    #[serde(default)]
    pub offset: usize,
    /// Page size, clamped to `1..=500`
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Enqueues a delivery.
///
/// Answers 202 with the new identifier, or 422 if the request is invalid or
/// names an unknown client.
#[instrument(name = "enqueue_delivery", skip_all)]
pub async fn enqueue_delivery(
    State(state): State<AppState>,
    Json(request): Json<NewDelivery>,
) -> Response {
    let kind = request.kind;
    let targets = request.targets.len();
    match state.engine.enqueue(request).await {
        Ok(delivery_id) => {
            info!(%delivery_id, ?kind, targets, "delivery accepted");
            (
                StatusCode::ACCEPTED,
                Json(EnqueueResponse { delivery_id, status: DeliveryStatus::Pending }),
            )
                .into_response()
        },
        Err(e) => error_response(&e),
    }
}

/// Returns one record.
#[instrument(name = "get_delivery", skip(state))]
pub async fn get_delivery(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.engine.get_status(DeliveryId(id)).await {
        Ok(record) => (StatusCode::OK, Json(DeliveryView::from(&record))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Lists records in one status, oldest first.
#[instrument(name = "list_deliveries", skip(state))]
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let page = PageRequest::new(query.offset, query.limit.unwrap_or(PageRequest::default().limit));
    match state.engine.list_by_status(query.status, page).await {
        Ok(records) => {
            let page = Page {
                items: records.items.iter().map(DeliveryView::from).collect(),
                total: records.total,
                offset: records.offset,
                next_offset: records.next_offset,
            };
            (StatusCode::OK, Json(page)).into_response()
        },
        Err(e) => error_response(&e),
    }
}

/// Moves a failed or dead-lettered record back to pending.
///
/// Answers 409 from any other status.
#[instrument(name = "retry_delivery", skip(state))]
pub async fn retry_delivery(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.engine.retry(DeliveryId(id)).await {
        Ok(record) => (StatusCode::OK, Json(DeliveryView::from(&record))).into_response(),
        Err(e) => error_response(&e),
    }
}
