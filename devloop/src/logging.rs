//! Diagnostic tracing for devloop binaries.
//!
//! Product state lives in `.devloop/` (plan, progress, activity log); this
//! module only configures stderr diagnostics controlled by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with `warn` as the default filter.
///
/// # Example
/// ```bash
/// RUST_LOG=devloop=debug devloop cycle
/// ```
pub fn init() {
    init_with_default("warn");
}

/// Initialize tracing from `RUST_LOG`, falling back to `default_filter`.
/// Output: stderr, compact format.
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
