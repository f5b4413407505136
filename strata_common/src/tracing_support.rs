//! Logging setup.

use tracing_subscriber::{fmt::Subscriber, prelude::*, EnvFilter};

/// Set up the `tracing` library for a daemon or worker process.
///
/// Output goes to stderr so an ingest command's stdout stays
/// machine-readable. `RUST_LOG` controls the filter and defaults to `info`.
pub fn initialize_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish()
        .init();
}
