//! Clock abstraction for leases, backoff, and poll intervals.
//!
//! Every timestamp the engine writes (`next_attempt_at`, lease expiry,
//! `completed_at`) comes from an injected [`Clock`], so tests can drive the
//! retry lifecycle through virtual time instead of sleeping.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use chrono::{DateTime, Utc};

/// Source of time for the delivery engine.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant for measuring durations.
    fn now(&self) -> Instant;

    /// Wall-clock time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the given duration.
    ///
    /// Production clocks suspend the task; test clocks advance virtual time
    /// and return immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Clock backed by the operating system and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// Cloning shares the underlying time, so a test can hold one handle while
/// the engine holds another. `sleep` advances time and yields once.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    wall_micros: Arc<AtomicI64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock starting at a fixed wall time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            wall_micros: Arc::new(AtomicI64::new(start.timestamp_micros())),
            base_instant: Instant::now(),
        }
    }

    /// Advances both monotonic and wall time.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        self.elapsed_ns.fetch_add(nanos, Ordering::AcqRel);
        self.wall_micros.fetch_add(micros, Ordering::AcqRel);
    }

    /// Advances wall time to `target` if it lies in the future.
    pub fn advance_to(&self, target: DateTime<Utc>) {
        if let Ok(delta) = (target - self.now_utc()).to_std() {
            self.advance(delta);
        }
    }

    /// Virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        self.now_utc().into()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let micros = self.wall_micros.load(Ordering::Acquire);
        DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
    }
}
