//! Process-wide tracing setup.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::{LoggingConfig, init};
