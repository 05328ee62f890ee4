//! Error types for delivery operations.
//!
//! Covers everything that can go wrong between claiming a record and
//! committing its result: rendering, the network, and the store. HTTP
//! responses are not errors; `dispatcher::classify_status` turns them into
//! outcomes. Transport errors know which dispatch outcome they map to.

use std::{fmt, time::Duration};

use outbound_core::{CoreError, DeliveryId, DeliveryStatus, TargetOutcome};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised by the delivery engine.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Template failed to render.
    #[error("template error: {message}")]
    TemplateError {
        /// Renderer diagnostic
        message: String,
    },

    /// The delivery store could not be reached.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Store error message
        message: String,
    },

    /// Commit rejected because the claim was lost.
    #[error("stale claim on delivery {delivery_id}")]
    StaleClaim {
        /// Record whose claim was lost
        delivery_id: DeliveryId,
    },

    /// Record or client not found.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing
        message: String,
    },

    /// Enqueue request failed validation.
    #[error("invalid delivery request: {message}")]
    InvalidInput {
        /// Validation failure
        message: String,
    },

    /// Requested status change is not allowed.
    #[error("cannot move delivery from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: DeliveryStatus,
        /// Requested status
        to: DeliveryStatus,
    },

    /// Invalid target or client configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Worker that panicked
        worker_id: usize,
        /// Join error text
        error: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a template error.
    pub fn template(message: impl Into<String>) -> Self {
        Self::TemplateError { message: message.into() }
    }

    /// Creates a store unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable { message: message.into() }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Dispatch outcome this error stands for, if it came from a dispatch.
    ///
    /// Transport failures are transient. A target that cannot be addressed
    /// at all is permanent.
    pub fn outcome(&self) -> Option<TargetOutcome> {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } => {
                Some(TargetOutcome::RejectedTransient)
            },
            Self::ConfigurationError { .. } => Some(TargetOutcome::RejectedPermanent),
            _ => None,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::StoreUnavailable(message) => Self::StoreUnavailable { message },
            CoreError::NotFound(message) => Self::NotFound { message },
            CoreError::InvalidInput(message) => Self::InvalidInput { message },
            CoreError::StaleClaim(delivery_id) => Self::StaleClaim { delivery_id },
            CoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
        }
    }
}

/// Category of delivery error for logs and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// Template rendering.
    Template,
    /// Store operations and claim ownership.
    Store,
    /// Caller input and configuration problems.
    Configuration,
    /// Internal system errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::TemplateError { .. } => Self::Template,
            DeliveryError::StoreUnavailable { .. }
            | DeliveryError::StaleClaim { .. }
            | DeliveryError::NotFound { .. }
            | DeliveryError::InvalidTransition { .. } => Self::Store,
            DeliveryError::InvalidInput { .. } | DeliveryError::ConfigurationError { .. } => {
                Self::Configuration
            },
            DeliveryError::WorkerPanic { .. }
            | DeliveryError::ShutdownTimeout { .. }
            | DeliveryError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Template => write!(f, "template"),
            Self::Store => write!(f, "store"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_outcomes() {
        assert_eq!(
            DeliveryError::network("connection refused").outcome(),
            Some(TargetOutcome::RejectedTransient)
        );
        assert_eq!(DeliveryError::timeout(30).outcome(), Some(TargetOutcome::RejectedTransient));
        assert_eq!(
            DeliveryError::configuration("bad url").outcome(),
            Some(TargetOutcome::RejectedPermanent)
        );
        assert_eq!(DeliveryError::template("x").outcome(), None);
        assert_eq!(DeliveryError::store_unavailable("down").outcome(), None);
    }

    #[test]
    fn core_errors_convert_by_variant() {
        let id = DeliveryId::new();
        assert!(matches!(
            DeliveryError::from(CoreError::StaleClaim(id)),
            DeliveryError::StaleClaim { delivery_id } if delivery_id == id
        ));
        assert!(matches!(
            DeliveryError::from(CoreError::unavailable("down")),
            DeliveryError::StoreUnavailable { .. }
        ));
        assert!(matches!(
            DeliveryError::from(CoreError::invalid("no targets")),
            DeliveryError::InvalidInput { .. }
        ));
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("x")), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from(&DeliveryError::template("x")), ErrorCategory::Template);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::store_unavailable("x")),
            ErrorCategory::Store
        );
        assert_eq!(ErrorCategory::Template.to_string(), "template");
    }
}
