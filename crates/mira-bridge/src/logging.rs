//! Tracing setup for binaries and integration tests.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `MIRA_LOG` overrides `default_filter`.
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_env("MIRA_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
