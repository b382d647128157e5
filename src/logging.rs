//! Logging bootstrap.
//!
//! `RUST_LOG` wins over the configured level. Initialization is idempotent and
//! never panics; a second call is a no-op.

use env_logger::Env;

/// Initializes `env_logger` with `default_level` as the fallback filter.
///
/// Returns `false` when a logger was already installed.
pub fn init(default_level: &str) -> bool {
    let level = normalize_level(default_level);
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        "off" => "off",
        _ => "info",
    }
}
