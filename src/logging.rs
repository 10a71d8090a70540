//! Tracing subscriber bootstrap.
//!
//! The library only emits `tracing` events; binaries and tests that want to
//! see them call [`init_tracing`] once.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding an `EnvFilter` directive, e.g. `bus_listener=debug`.
pub const LOG_ENV: &str = "BUS_LISTENER_LOG";

/// Install a `fmt` subscriber filtered by `$BUS_LISTENER_LOG`, falling back to
/// `default_directive`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
