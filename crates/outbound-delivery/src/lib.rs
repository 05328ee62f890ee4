//! Outbound delivery engine with at-least-once semantics.
//!
//! This crate takes queued delivery records, renders their content, fans the
//! result out to every target over HTTP, and drives each record through a
//! retry lifecycle until it reaches a terminal status.
//!
//! # Architecture
//!
//! Workers share nothing but the [`storage::DeliveryStore`]. Each cycle a
//! worker:
//!
//! 1. **Claims** due records, leasing each with a fresh claim token
//! 2. **Renders** templated payloads once per round
//! 3. **Dispatches** to every target not yet delivered, with bounded
//!    concurrency per record
//! 4. **Commits** the per-target results and the scheduler's decision, which
//!    the store accepts only if the claim token still matches
//!
//! ```text
//!  enqueue ──▶ ┌───────────┐  claim_due   ┌──────────────┐   attempt   ┌────────────┐
//!              │   Store   │ ───────────▶ │    Worker    │ ──────────▶ │ Dispatcher │
//!              │ (leases)  │ ◀─────────── │ Fan-out +    │ ◀────────── │  (reqwest) │
//!              └───────────┘ commit_result│ Scheduler    │   report    └────────────┘
//!                                         └──────────────┘
//! ```
//!
//! A crashed or slow worker simply lets its lease expire; the next claim
//! picks the record up again. Commits from the old owner fail with
//! `StaleClaim` and are dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use outbound_core::{RealClock, StaticRegistry};
//! use outbound_delivery::{storage::memory::InMemoryDeliveryStore, DeliveryConfig, DeliveryEngine};
//!
//! # async fn example() -> outbound_delivery::Result<()> {
//! let clock = Arc::new(RealClock::new());
//! let store = Arc::new(InMemoryDeliveryStore::new(clock.clone()));
//! let registry = Arc::new(StaticRegistry::new());
//! let engine = DeliveryEngine::new(store, registry, DeliveryConfig::default(), clock)?;
//!
//! engine.start().await?;
//! // ... enqueue work ...
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod render;
pub mod retry;
pub mod storage;
pub mod worker;
pub mod worker_pool;

pub use engine::DeliveryEngine;
pub use error::{DeliveryError, Result};
pub use worker::{DeliveryConfig, EngineStats};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default number of records claimed per worker cycle.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default interval between polls when no work is due, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;

/// Default claim lease in seconds.
pub const DEFAULT_LEASE_SECONDS: u64 = 300;

/// Default attempt budget per record.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default number of concurrent dispatches per record.
pub const DEFAULT_TARGET_CONCURRENCY: usize = 8;
