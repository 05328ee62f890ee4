//! Test infrastructure for the outbound delivery workspace.
//!
//! Provides a wired-up [`TestEnv`], request builders, a recording audit
//! sink, a scripted dispatcher and mock HTTP targets. Everything runs in
//! process against a virtual clock.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod dispatch;
pub mod env;
pub mod events;
pub mod fixtures;
pub mod http;

pub use dispatch::ScriptedDispatcher;
pub use env::{TestEnv, TestEnvBuilder};
pub use events::RecordingEventHandler;
pub use fixtures::DeliveryBuilder;
pub use http::{MockEndpoint, MockServer};

/// Installs a test-writer tracing subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to errors only.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_test_writer()
        .try_init();
}
