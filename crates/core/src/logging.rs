//! Structured logging setup for meshlink nodes.
//!
//! The topology crates only emit `tracing` events; the embedding node picks
//! a subscriber once at startup with one of the functions below.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a human-readable subscriber.
///
/// Log level is taken from `RUST_LOG`, defaulting to `info`.
///
/// # Example
/// ```no_run
/// use meshlink_core::logging;
///
/// logging::init();
/// tracing::info!("node started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true))
        .init();
}

/// Install a JSON subscriber for log aggregation.
///
/// # Example
/// ```no_run
/// use meshlink_core::logging;
///
/// logging::init_json();
/// tracing::info!(children = 3, "table restored");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true))
        .init();
}

/// Install a subscriber that writes through the test harness, ignoring
/// the error when one is already set.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_test_writer())
        .try_init();
}
