//! Tracing init.
//!
//! Reads ENVMATRIX_QUIET, ENVMATRIX_LOG_LEVEL and ENVMATRIX_LOG_JSON.

use tracing_subscriber::{prelude::*, EnvFilter};

struct LogConfig {
    quiet: bool,
    log_level: String,
    log_json: bool,
}

impl LogConfig {
    fn from_env() -> Self {
        let truthy = |k: &str| {
            std::env::var(k)
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };
        Self {
            quiet: truthy("ENVMATRIX_QUIET"),
            log_level: std::env::var("ENVMATRIX_LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string()),
            log_json: truthy("ENVMATRIX_LOG_JSON"),
        }
    }
}

/// Initialize tracing. Call at process startup.
/// When ENVMATRIX_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = LogConfig::from_env();
    let level = if cfg.quiet {
        "warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}
