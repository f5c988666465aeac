//! Development-time tracing.
//!
//! Dispatches, fired rules, change sets, and persistence outcomes are traced
//! at `debug`/`info`; degraded paths (failing conditions, storage write
//! failures, ceilings reached) at `warn`. Library code never installs a
//! subscriber; binaries call [`init`] once.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=actions=debug actions dispatch rules.json btn1 press
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
