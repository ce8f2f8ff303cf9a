//! Logging utilities

use std::sync::OnceLock;

/// Global flag for verbose logging
static VERBOSE_LOGGING: OnceLock<bool> = OnceLock::new();

/// Check if verbose logging is enabled
pub fn is_verbose() -> bool {
    VERBOSE_LOGGING.get().copied().unwrap_or(false)
}

/// Initialize the tracing subscriber and the verbose flag
///
/// Priority: RUST_LOG > default (INFO). The verbose flag controls detail,
/// not level.
pub fn init_logging(verbose: bool) {
    VERBOSE_LOGGING.set(verbose).ok();

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }
}
