//! Tracing/logging initialization.
//!
//! `RUST_LOG` wins over the configured level. Output is JSON unless the
//! config asks for the human-readable format.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `erpguard_infra=debug,info`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
