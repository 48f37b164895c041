//! Expiry Cache - a lightweight in-memory expiring cache
//!
//! Entries automatically expire after a configurable timeout. Instead of
//! per-entry timers, each folder keeps a sliding set of time-slot buckets
//! aged in bulk by a shared periodic ticking task, so expiry costs O(1)
//! amortized per entry at the price of up-to-one-tick staleness.
//!
//! # Overview
//!
//! Create one [`ExpiryStrategy`] (which starts its background ticker), then
//! bind any number of [`ExpiryFolder`]s to it:
//!
//! ```no_run
//! use std::time::Duration;
//! use expiry_cache::{ExpiryFolder, ExpiryStrategy};
//!
//! # #[tokio::main] async fn main() -> expiry_cache::Result<()> {
//! let strategy = ExpiryStrategy::new(Duration::from_secs(300), Duration::from_secs(5))?;
//! let sessions: ExpiryFolder<String, String> = ExpiryFolder::new("sessions", &strategy)?;
//!
//! sessions.put("user-42".to_string(), "token".to_string())?;
//! assert_eq!(sessions.get(&"user-42".to_string())?, Some("token".to_string()));
//!
//! strategy.stop()?;
//! # Ok(()) }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod listener;
pub mod strategy;
mod tasks;

pub use cache::{CacheStats, ExpiryFolder};
pub use config::Config;
pub use error::{CacheError, Result};
pub use listener::{ExpiryListener, FnListener};
pub use strategy::ExpiryStrategy;
