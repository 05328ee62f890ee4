//! HTTP request handlers.
//!
//! Handlers are grouped by functionality:
//! - `deliveries` - enqueue, status, listing and manual retry
//! - `health` - health and liveness probes
//!
//! Every failure is answered with an [`ErrorResponse`] whose status follows
//! the engine error: validation failures are 422, unknown records 404,
//! refused transitions 409 and store outages 503.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use outbound_delivery::{error::ErrorCategory, DeliveryError};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

pub mod deliveries;
pub mod health;

pub use deliveries::{enqueue_delivery, get_delivery, list_deliveries, retry_delivery};
pub use health::{health_check, liveness_check};

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable description
    pub message: String,
}

/// Maps an engine error to its HTTP status and stable code.
pub fn classify_error(error: &DeliveryError) -> (StatusCode, &'static str) {
    match error {
        DeliveryError::InvalidInput { .. } | DeliveryError::TemplateError { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request")
        },
        DeliveryError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        DeliveryError::InvalidTransition { .. } | DeliveryError::StaleClaim { .. } => {
            (StatusCode::CONFLICT, "invalid_transition")
        },
        DeliveryError::StoreUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        },
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

/// Builds the error response for an engine error.
pub fn error_response(error: &DeliveryError) -> Response {
    let (status, code) = classify_error(error);
    if status.is_server_error() {
        error!(error = %error, category = %ErrorCategory::from(error), "request failed");
    } else {
        warn!(error = %error, "request rejected");
    }

    let body = ErrorResponse {
        error: ErrorDetail { code: code.to_string(), message: error.to_string() },
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use outbound_core::DeliveryStatus;

    use super::*;

    #[test]
    fn engine_errors_map_to_http_statuses() {
        let cases = [
            (DeliveryError::invalid_input("no targets"), StatusCode::UNPROCESSABLE_ENTITY),
            (DeliveryError::NotFound { message: "delivery".into() }, StatusCode::NOT_FOUND),
            (
                DeliveryError::InvalidTransition {
                    from: DeliveryStatus::Succeeded,
                    to: DeliveryStatus::Pending,
                },
                StatusCode::CONFLICT,
            ),
            (DeliveryError::store_unavailable("down"), StatusCode::SERVICE_UNAVAILABLE),
            (DeliveryError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(classify_error(&error).0, expected, "{error}");
        }
    }
}
