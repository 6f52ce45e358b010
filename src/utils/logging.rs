// src/utils/logging.rs
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the `tracing_subscriber` formatter for the report fetcher.
/// Reads log level filters from the `RUST_LOG` environment variable and
/// defaults to "info", keeping noisy HTML parser crates at "warn". Logs go
/// to stderr so stdout carries only the JSON outcome.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,html5ever=warn,selectors=warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Logging setup complete.");
}
