//! Tracing setup for the workspace binaries.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the filter when set; otherwise the engine crates
/// log at debug and everything else at info. Call once, before creating
/// any engine objects.
///
/// # Example
/// ```
/// ember_core::init_logging();
/// tracing::info!("starting");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,ember_engine=debug,ember_rhi=debug,ember_platform=debug")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
