//! Expiry Strategy Module
//!
//! Owns the timeout/precision configuration and drives the background
//! ticking task that ages every folder registered with it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::spawn_ticker;

// == Strategy-Folder Protocol ==
/// Crate-internal seam between a strategy and the folders it drives.
///
/// The trait erases the folder's key/value generics so a single strategy can
/// serve folders of different types. The strategy holds only `Weak`
/// references to implementors; a dropped folder is pruned on the next tick.
pub(crate) trait TickRecipient: Send + Sync {
    /// Rotates the folder's buckets and sweeps the evicted bucket.
    ///
    /// Returns the number of entries expired by this tick.
    fn tick(&self) -> Result<usize>;

    /// Invalidates the folder permanently.
    fn strategy_stopped(&self);

    /// Folder name, for diagnostics.
    fn name(&self) -> &str;
}

// == Slot Count ==
/// Number of aging buckets a folder needs: `ceil(timeout / precision)`.
///
/// Both durations must be at least one millisecond (validated by
/// [`ExpiryStrategy::new`]).
pub(crate) fn compute_slot_count(timeout: Duration, precision: Duration) -> usize {
    let timeout_ms = timeout.as_millis();
    let precision_ms = precision.as_millis();
    ((timeout_ms + precision_ms - 1) / precision_ms) as usize
}

// == Shared State ==
/// State shared between the strategy handle, its folders, and the ticker
/// task. The ticker holds a strong reference, so the state (and the ticking)
/// outlives dropped handles until `stop()` is called.
pub(crate) struct StrategyInner {
    timeout: Duration,
    precision: Duration,
    slot_count: usize,
    /// Non-owning slots for every registered folder. Mutated by folder
    /// registration and pruned by the tick sweep, both under this lock.
    folders: Mutex<Vec<Weak<dyn TickRecipient>>>,
    /// One-way false-to-true transition.
    stopped: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyInner {
    pub(crate) fn precision(&self) -> Duration {
        self.precision
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// One pass over the folder registry: tick every live folder and prune
    /// reclaimed slots. Returns the number of entries expired in this pass.
    ///
    /// A failing folder is logged and the pass continues; a dead ticker
    /// would silently freeze expiry for every folder on this strategy.
    pub(crate) fn on_tick(&self) -> usize {
        if self.is_stopped() {
            return 0;
        }
        let mut expired = 0;
        self.folders.lock().retain(|slot| match slot.upgrade() {
            Some(folder) => {
                match folder.tick() {
                    Ok(count) => expired += count,
                    Err(e) => error!(folder = folder.name(), "expiry tick failed: {}", e),
                }
                true
            }
            None => false,
        });
        expired
    }
}

// == Expiry Strategy ==
/// Drives time-based expiry for one or more [`ExpiryFolder`]s.
///
/// Construction validates the timeout/precision pair, derives the folder
/// slot count, and immediately starts a background ticking task that fires
/// every `precision`. The task keeps running until [`stop`](Self::stop) is
/// called, even if every handle to the strategy has been dropped.
///
/// Two strategies are equal when their timeout and precision match.
///
/// [`ExpiryFolder`]: crate::ExpiryFolder
#[derive(Clone)]
pub struct ExpiryStrategy {
    inner: Arc<StrategyInner>,
}

impl ExpiryStrategy {
    // == Constructor ==
    /// Creates a strategy and starts its background ticking task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `InvalidArgument` if `timeout` or `precision` is below one
    /// millisecond, or if `timeout < precision`.
    pub fn new(timeout: Duration, precision: Duration) -> Result<Self> {
        if timeout.as_millis() < 1 {
            return Err(CacheError::InvalidArgument(
                "timeout must be at least 1 millisecond".to_string(),
            ));
        }
        if precision.as_millis() < 1 {
            return Err(CacheError::InvalidArgument(
                "precision must be at least 1 millisecond".to_string(),
            ));
        }
        if timeout < precision {
            return Err(CacheError::InvalidArgument(format!(
                "timeout ({:?}) must not be smaller than precision ({:?})",
                timeout, precision
            )));
        }

        let inner = Arc::new(StrategyInner {
            timeout,
            precision,
            slot_count: compute_slot_count(timeout, precision),
            folders: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            ticker: Mutex::new(None),
        });

        let handle = spawn_ticker(Arc::clone(&inner));
        *inner.ticker.lock() = Some(handle);

        Ok(Self { inner })
    }

    /// Creates a strategy from a [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            Duration::from_millis(config.timeout_ms),
            Duration::from_millis(config.precision_ms),
        )
    }

    // == Accessors ==
    /// Duration an entry remains valid after its last touch.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Interval between expiry ticks.
    pub fn precision(&self) -> Duration {
        self.inner.precision
    }

    /// Number of aging buckets each dependent folder allocates.
    pub fn slot_count(&self) -> usize {
        self.inner.slot_count
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    // == Stop ==
    /// Stops the strategy: cancels the ticking task and synchronously
    /// invalidates every live registered folder before returning.
    ///
    /// # Errors
    /// `IllegalState` if the strategy was already stopped.
    pub fn stop(&self) -> Result<()> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Err(CacheError::IllegalState(
                "strategy already stopped".to_string(),
            ));
        }

        if let Some(handle) = self.inner.ticker.lock().take() {
            handle.abort();
        }

        let folders = std::mem::take(&mut *self.inner.folders.lock());
        for slot in &folders {
            if let Some(folder) = slot.upgrade() {
                folder.strategy_stopped();
            }
        }
        debug!("expiry strategy stopped, {} folder slots released", folders.len());
        Ok(())
    }

    // == Register Folder ==
    /// Associates a folder with this strategy via a non-owning reference.
    ///
    /// # Errors
    /// `IllegalState` if the strategy has already stopped, so a folder can
    /// never be constructed against a dead strategy.
    pub(crate) fn register(&self, folder: Weak<dyn TickRecipient>) -> Result<()> {
        let mut folders = self.inner.folders.lock();
        if self.inner.is_stopped() {
            return Err(CacheError::IllegalState(
                "cannot register a folder on a stopped strategy".to_string(),
            ));
        }
        folders.push(folder);
        Ok(())
    }
}

impl PartialEq for ExpiryStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.inner.timeout == other.inner.timeout
            && self.inner.precision == other.inner.precision
    }
}

impl Eq for ExpiryStrategy {}

impl fmt::Debug for ExpiryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiryStrategy")
            .field("timeout", &self.inner.timeout)
            .field("precision", &self.inner.precision)
            .field("slot_count", &self.inner.slot_count)
            .field("stopped", &self.inner.is_stopped())
            .finish()
    }
}
