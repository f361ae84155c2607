use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging on stderr, keeping stdout for results.
///
/// `RUST_LOG` takes precedence over `default_level`, e.g.
/// `RUST_LOG=speedprobe=debug` to see every ping sample.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
