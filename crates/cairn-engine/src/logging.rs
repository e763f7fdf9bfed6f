//! Log output setup.
//!
//! The library crates only emit `tracing` events. Binaries and tests that want
//! to see them call [`init_logging`] once at startup.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` wins when set and valid; otherwise `default_filter` (for
/// example `"warn"` or `"cairn_graph=debug"`) is used. Returns `false` if a
/// global subscriber was already installed, which makes repeated calls
/// harmless.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
