//! Core domain model for outbound delivery.
//!
//! Provides strongly-typed identifiers, the delivery record and its
//! lifecycle states, the clock abstraction, audit events, and the target
//! registry seam. Every other crate in the workspace builds on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod registry;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    DeliveryCompletedEvent, DeliveryEvent, DeliveryRetryRequestedEvent, EventHandler,
    LoggingEventHandler, MulticastEventHandler, NoOpEventHandler, TargetSummary,
};
pub use models::{
    validate_target_url, ClaimToken, ContentFormat, DeliveryCommit, DeliveryId, DeliveryKind,
    DeliveryRecord, DeliveryStatus, Destination, NewDelivery, NextAction, Page, PageRequest,
    Payload, Target, TargetAttempt, TargetId, TargetOutcome, TargetSpec,
};
pub use registry::{RegistryEntry, StaticRegistry, TargetRegistry};
pub use time::{Clock, RealClock, TestClock};
