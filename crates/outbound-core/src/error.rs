//! Error taxonomy shared by the store, registry, and engine.
//!
//! These are bookkeeping errors. Network and rendering failures live in the
//! delivery crate, which converts from `CoreError` at the seam.

use thiserror::Error;

use crate::models::{DeliveryId, DeliveryStatus};

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for store and registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// The backing store could not be read or written.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller no longer holds the claim on this record.
    #[error("stale claim on delivery {0}")]
    StaleClaim(DeliveryId),

    /// Requested status change is not allowed from the current state.
    #[error("cannot move delivery from {from} to {to}")]
    InvalidTransition {
        /// Status the record is currently in
        from: DeliveryStatus,
        /// Status the caller asked for
        to: DeliveryStatus,
    },
}

impl CoreError {
    /// Creates a store unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Creates an invalid input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a not found error for a delivery.
    pub fn delivery_not_found(id: DeliveryId) -> Self {
        Self::NotFound(format!("delivery {id}"))
    }

    /// Returns whether a later attempt at the same operation may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_outages_are_transient() {
        assert!(CoreError::unavailable("disk full").is_transient());
        assert!(!CoreError::invalid("no targets").is_transient());
        assert!(!CoreError::StaleClaim(DeliveryId::new()).is_transient());
        assert!(!CoreError::delivery_not_found(DeliveryId::new()).is_transient());
    }

    #[test]
    fn transition_error_names_both_states() {
        let error = CoreError::InvalidTransition {
            from: DeliveryStatus::Succeeded,
            to: DeliveryStatus::Pending,
        };
        assert_eq!(error.to_string(), "cannot move delivery from succeeded to pending");
    }
}
