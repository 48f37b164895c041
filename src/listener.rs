//! Expiry listener: a callback invoked with each batch of expired entries.
//!
//! # Example
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use expiry_cache::{ExpiryFolder, ExpiryStrategy, FnListener};
//!
//! # #[tokio::main] async fn main() -> expiry_cache::Result<()> {
//! let strategy = ExpiryStrategy::new(Duration::from_secs(1), Duration::from_millis(200))?;
//! let folder: ExpiryFolder<String, String> = ExpiryFolder::new("sessions", &strategy)?;
//!
//! let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
//! let log2 = Arc::clone(&log);
//!
//! folder.add_listener(Arc::new(FnListener(
//!     move |_folder: &str, expired: &HashMap<String, String>| {
//!         log2.lock().unwrap().extend(expired.keys().cloned());
//!     },
//! )))?;
//! # Ok(()) }
//! ```

use std::collections::HashMap;

// == Expiry Listener Trait ==
/// A callback invoked once per expiry sweep with the full batch of entries
/// that left the folder on that tick.
///
/// Implementations must be `Send + Sync + 'static` so a listener can be
/// shared across threads via `Arc`. Registration is a multiset: the same
/// instance registered twice is notified twice per batch and must be removed
/// twice.
///
/// The callback runs after the folder's internal lock has been released, but
/// still inside the strategy's sweep over its folders. **Do not stop the
/// strategy or construct new folders on it from inside the callback**; that
/// would deadlock the sweep.
pub trait ExpiryListener<K, V>: Send + Sync + 'static {
    /// Called with the folder's name and the expired key-to-value batch.
    ///
    /// Only invoked for non-empty batches.
    fn on_expired(&self, folder: &str, expired: &HashMap<K, V>);
}

// == Closure Adapter ==
/// An [`ExpiryListener`] backed by a closure.
pub struct FnListener<F>(pub F);

impl<K, V, F> ExpiryListener<K, V> for FnListener<F>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(&str, &HashMap<K, V>) + Send + Sync + 'static,
{
    fn on_expired(&self, folder: &str, expired: &HashMap<K, V>) {
        (self.0)(folder, expired)
    }
}
