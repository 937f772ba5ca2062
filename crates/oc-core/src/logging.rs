//! Logging bootstrap

use crate::config::{DebugConfig, LogLevel};
use tracing_subscriber::EnvFilter;

impl LogLevel {
    /// Filter directive for this level
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Build the filter used by [`init`]. `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &DebugConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_directive()))
}

/// Install the global fmt subscriber.
///
/// Returns false if a subscriber was already installed (tests, embedding).
pub fn init(config: &DebugConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .try_init()
        .is_ok()
}
