//! Configuration Module
//!
//! Handles loading expiry settings from environment variables.

use std::env;

/// Expiry configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// Validation of the timeout/precision constraints happens when the config is
/// turned into an [`ExpiryStrategy`](crate::ExpiryStrategy).
#[derive(Debug, Clone)]
pub struct Config {
    /// Duration an entry remains valid after its last touch, in milliseconds
    pub timeout_ms: u64,
    /// Interval between expiry ticks, in milliseconds
    pub precision_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `EXPIRY_TIMEOUT_MS` - Entry timeout in milliseconds (default: 300000)
    /// - `EXPIRY_PRECISION_MS` - Tick interval in milliseconds (default: 5000)
    pub fn from_env() -> Self {
        Self {
            timeout_ms: env::var("EXPIRY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300_000),
            precision_ms: env::var("EXPIRY_PRECISION_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            precision_ms: 5_000,
        }
    }
}
