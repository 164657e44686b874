// Logging
// tracing subscriber setup shared by the CLI and tests

use crate::config::ENV_LOG;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install a console subscriber.
///
/// The filter comes from `MTX_LOG` when set, otherwise from `default_level`.
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr)
            .with_filter(filter),
    );

    if subscriber.try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized");
    }
}
