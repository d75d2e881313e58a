//! Logging init, mirroring the base's `layers::init_tracing` — one call at
//! startup, an `EnvFilter` built from the `-l` flag, nothing fancier.

use crate::config::LogLevel;

/// Install the global `tracing` subscriber. Idempotent: a second call is a
/// no-op rather than a panic, so tests that spin up multiple `HullConfig`s
/// in one process don't need to coordinate.
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter_directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
