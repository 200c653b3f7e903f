//! Tracing (logging)

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise tracing (logging)
///
/// Events go to stderr, stdout is reserved for the actual output of the binaries. The filter is
/// read from the `RUST_LOG` environment variable, falling back to `default_filter` if it is not
/// set or invalid.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
