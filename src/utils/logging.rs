use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Maps a configured level name onto a `tracing` level.
///
/// Unknown names fall back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize tracing/logging for the application.
///
/// `RUST_LOG` wins over `default_level` when it is set. Uses `try_init` so
/// tests and embedding code can call this more than once.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(default_level).to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
