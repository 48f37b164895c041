//! Expiry Folder Module
//!
//! The expiring key-value store: one hot bucket of most-recently-touched
//! entries plus a fixed number of aging buckets arranged by recency. Every
//! tick shifts the buckets one position and sweeps the oldest bucket's
//! surviving entries out to the registered listeners.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::cache::{CacheStats, Entry};
use crate::error::{CacheError, Result};
use crate::listener::ExpiryListener;
use crate::strategy::{ExpiryStrategy, TickRecipient};

/// Source of the per-folder instance numbers used to order two-folder lock
/// acquisition.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

// == Folder State ==
/// Bucket storage, listeners and stats. Wrapped in `Option` inside the
/// folder mutex: `None` is the permanently-invalid state entered when the
/// owning strategy stops.
struct FolderState<K, V> {
    /// Entries touched since the last tick.
    hot: HashMap<K, Entry<V>>,
    /// Aging buckets ordered front-to-back from most recently rotated out
    /// of hot to next-in-line for eviction.
    aging: VecDeque<HashMap<K, Entry<V>>>,
    /// Registered listeners; duplicates receive one call each per batch.
    listeners: Vec<Arc<dyn ExpiryListener<K, V>>>,
    stats: CacheStats,
}

impl<K: Eq + Hash, V> FolderState<K, V> {
    /// Live entries across all buckets, counting each key once via its most
    /// recent copy. Lazily-expired entries are excluded.
    fn live_count(&self) -> usize {
        let mut count = self.hot.values().filter(|e| !e.is_expired()).count();
        let mut seen: HashSet<&K> = self.hot.keys().collect();
        for bucket in &self.aging {
            for (key, entry) in bucket {
                if seen.insert(key) && !entry.is_expired() {
                    count += 1;
                }
            }
        }
        count
    }
}

// == Shared Internals ==
pub(crate) struct FolderInner<K, V> {
    name: String,
    /// Stable identity for the two-folder lock order.
    instance: u64,
    timeout: Duration,
    precision: Duration,
    slot_count: usize,
    state: Mutex<Option<FolderState<K, V>>>,
}

impl<K, V> FolderInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn invalid_state(&self) -> CacheError {
        CacheError::IllegalState(format!(
            "folder '{}' is no longer valid: its strategy has stopped",
            self.name
        ))
    }

    /// Bucket rotation and expiry sweep. Listeners are invoked after the
    /// folder lock is released.
    fn do_tick(&self) -> Result<usize> {
        let (batch, listeners) = {
            let mut guard = self.state.lock();
            let state = guard.as_mut().ok_or_else(|| self.invalid_state())?;

            // Rotate: the back bucket falls out, everything else shifts one
            // slot toward the back, the hot bucket becomes the front aging
            // bucket, and a fresh hot bucket takes its place.
            let evicted = state.aging.pop_back().unwrap_or_default();
            let hot = std::mem::take(&mut state.hot);
            state.aging.push_front(hot);

            // Everything in the evicted bucket has had a full pass through
            // the aging buckets without being touched. An entry that is
            // nevertheless not past its deadline indicates a slot-count /
            // timeout misalignment: log it and discard it with the rest.
            let mut batch = HashMap::with_capacity(evicted.len());
            for (key, entry) in evicted {
                if !entry.is_expired() {
                    error!(
                        folder = %self.name,
                        "unexpired entry swept out by bucket rotation"
                    );
                }
                batch.insert(key, entry.into_value());
            }
            state.stats.record_expirations(batch.len() as u64);

            if batch.is_empty() || state.listeners.is_empty() {
                (batch, Vec::new())
            } else {
                (batch, state.listeners.clone())
            }
        };

        for listener in &listeners {
            listener.on_expired(&self.name, &batch);
        }
        Ok(batch.len())
    }
}

impl<K, V> TickRecipient for FolderInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn tick(&self) -> Result<usize> {
        self.do_tick()
    }

    fn strategy_stopped(&self) {
        // Dropping the state releases all bucket and listener storage and
        // makes every subsequent operation fail. Safe against concurrent
        // operations: they hold the same lock.
        if self.state.lock().take().is_some() {
            debug!(folder = %self.name, "strategy stopped, folder invalidated");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// == Expiry Folder ==
/// A thread-safe key-value store whose entries expire after the timeout of
/// the [`ExpiryStrategy`] it was built on.
///
/// All operations are synchronous and serialized by a single per-folder
/// lock, including the periodic tick arriving from the strategy's background
/// task. Cloning the handle shares the same folder.
///
/// An entry past its deadline that has not yet been swept by a tick is
/// treated as absent by reads (lazy expiry); the physical removal happens in
/// bulk when the entry's bucket rotates out, within at most
/// `timeout + precision`.
pub struct ExpiryFolder<K, V> {
    inner: Arc<FolderInner<K, V>>,
}

impl<K, V> Clone for ExpiryFolder<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ExpiryFolder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a folder bound to `strategy` and registers it for ticking.
    ///
    /// # Errors
    /// `InvalidArgument` if `name` is empty; `IllegalState` if the strategy
    /// has already stopped.
    pub fn new(name: impl Into<String>, strategy: &ExpiryStrategy) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "folder name must not be empty".to_string(),
            ));
        }

        let slot_count = strategy.slot_count();
        let inner = Arc::new(FolderInner {
            name,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            timeout: strategy.timeout(),
            precision: strategy.precision(),
            slot_count,
            state: Mutex::new(Some(FolderState {
                hot: HashMap::new(),
                aging: (0..slot_count).map(|_| HashMap::new()).collect(),
                listeners: Vec::new(),
                stats: CacheStats::new(),
            })),
        });

        let recipient: Arc<dyn TickRecipient> = inner.clone();
        strategy.register(Arc::downgrade(&recipient))?;

        Ok(Self { inner })
    }

    // == Put ==
    /// Inserts or overwrites `key` as a freshly touched entry.
    ///
    /// The entry always lands in the hot bucket; an older copy sitting in an
    /// aging bucket is left behind on purpose and silently swept when its
    /// bucket rotates out. A put resets recency to "most recent".
    pub fn put(&self, key: K, value: V) -> Result<()> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or_else(|| self.inner.invalid_state())?;
        state.hot.insert(key, Entry::new(value, self.inner.timeout));
        Ok(())
    }

    // == Get ==
    /// Looks up `key`, re-touching and promoting it on a hit.
    ///
    /// The hot bucket is checked first, then each aging bucket from newest
    /// to oldest. A hit resets the entry's deadline and moves an aging entry
    /// back into the hot bucket. An entry past its deadline is a miss and is
    /// left in place for the next bulk sweep.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or_else(|| self.inner.invalid_state())?;
        let FolderState {
            hot, aging, stats, ..
        } = state;

        if let Some(entry) = hot.get_mut(key) {
            if entry.is_expired() {
                stats.record_miss();
                return Ok(None);
            }
            entry.touch(self.inner.timeout);
            stats.record_hit();
            return Ok(Some(entry.value().clone()));
        }

        for bucket in aging.iter_mut() {
            let expired = match bucket.get(key) {
                Some(entry) => entry.is_expired(),
                None => continue,
            };
            if expired {
                stats.record_miss();
                return Ok(None);
            }
            if let Some(mut entry) = bucket.remove(key) {
                entry.touch(self.inner.timeout);
                let value = entry.value().clone();
                hot.insert(key.clone(), entry);
                stats.record_hit();
                return Ok(Some(value));
            }
        }

        stats.record_miss();
        Ok(None)
    }

    // == Find ==
    /// Read-only lookup: same search and expiry check as [`get`](Self::get)
    /// but the entry is neither re-touched nor promoted.
    pub fn find(&self, key: &K) -> Result<Option<V>> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or_else(|| self.inner.invalid_state())?;
        let FolderState {
            hot, aging, stats, ..
        } = state;

        let found = hot
            .get(key)
            .or_else(|| aging.iter().find_map(|bucket| bucket.get(key)));

        match found {
            Some(entry) if !entry.is_expired() => {
                stats.record_hit();
                Ok(Some(entry.value().clone()))
            }
            _ => {
                stats.record_miss();
                Ok(None)
            }
        }
    }

    // == Remove ==
    /// Removes every physical copy of `key` (hot bucket, aging buckets and
    /// any orphaned older copies).
    ///
    /// Returns the most recent value, or `None` if the key was absent or
    /// its entry had already logically expired.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or_else(|| self.inner.invalid_state())?;

        let mut removed = state.hot.remove(key);
        for bucket in state.aging.iter_mut() {
            let older = bucket.remove(key);
            if removed.is_none() {
                removed = older;
            }
        }

        Ok(match removed {
            Some(entry) if !entry.is_expired() => Some(entry.into_value()),
            _ => None,
        })
    }

    // == Size ==
    /// Number of live (non-expired) entries.
    ///
    /// A live scan rather than a cached counter: lazy expiry means the raw
    /// bucket sizes overstate the live content.
    pub fn len(&self) -> Result<usize> {
        let guard = self.inner.state.lock();
        let state = guard.as_ref().ok_or_else(|| self.inner.invalid_state())?;
        Ok(state.live_count())
    }

    /// Whether the folder holds no live entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // == Stats ==
    /// Returns a snapshot of the folder's performance counters.
    pub fn stats(&self) -> Result<CacheStats> {
        let guard = self.inner.state.lock();
        let state = guard.as_ref().ok_or_else(|| self.inner.invalid_state())?;
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.live_count());
        Ok(stats)
    }

    // == Listeners ==
    /// Registers a listener. Registration is a multiset: adding the same
    /// instance twice means it is notified twice per batch and must be
    /// removed twice.
    pub fn add_listener(&self, listener: Arc<dyn ExpiryListener<K, V>>) -> Result<()> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or_else(|| self.inner.invalid_state())?;
        state.listeners.push(listener);
        Ok(())
    }

    /// Removes one registration of `listener`, matched by instance identity.
    /// Unregistered listeners are ignored.
    pub fn remove_listener(&self, listener: &Arc<dyn ExpiryListener<K, V>>) -> Result<()> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or_else(|| self.inner.invalid_state())?;
        if let Some(pos) = state
            .listeners
            .iter()
            .position(|l| Arc::ptr_eq(l, listener))
        {
            state.listeners.remove(pos);
        }
        Ok(())
    }

    // == Copy ==
    /// Snapshots this folder's current buckets into `target`.
    ///
    /// The target's hot bucket and its first
    /// `min(self.slot_count, target.slot_count)` aging buckets are replaced
    /// with shallow clones; afterwards the two folders mutate independently.
    ///
    /// # Errors
    /// `InvalidArgument` if `target` is this folder or its strategy
    /// precision differs (the bucket layouts would not be time-compatible);
    /// `IllegalState` if either folder has been invalidated.
    pub fn copy_into(&self, target: &ExpiryFolder<K, V>) -> Result<()> {
        if Arc::ptr_eq(&self.inner, &target.inner) {
            return Err(CacheError::InvalidArgument(
                "cannot copy a folder into itself".to_string(),
            ));
        }
        if self.inner.precision != target.inner.precision {
            return Err(CacheError::InvalidArgument(format!(
                "precision mismatch: {:?} vs {:?}",
                self.inner.precision, target.inner.precision
            )));
        }

        // Both locks are needed at once; acquire in increasing instance
        // order so opposite-direction copies cannot circular-wait.
        let source_first = self.inner.instance < target.inner.instance;
        let mut first_guard = if source_first {
            self.inner.state.lock()
        } else {
            target.inner.state.lock()
        };
        let mut second_guard = if source_first {
            target.inner.state.lock()
        } else {
            self.inner.state.lock()
        };
        let (src_guard, dst_guard) = if source_first {
            (&mut first_guard, &mut second_guard)
        } else {
            (&mut second_guard, &mut first_guard)
        };

        let src = src_guard.as_ref().ok_or_else(|| self.inner.invalid_state())?;
        let dst = dst_guard
            .as_mut()
            .ok_or_else(|| target.inner.invalid_state())?;

        dst.hot = src.hot.clone();
        let shared = src.aging.len().min(dst.aging.len());
        for i in 0..shared {
            dst.aging[i] = src.aging[i].clone();
        }
        Ok(())
    }

    // == Accessors ==
    /// The folder's descriptive name (diagnostics only).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Entry timeout inherited from the strategy.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Tick interval inherited from the strategy.
    pub fn precision(&self) -> Duration {
        self.inner.precision
    }

    /// Number of aging buckets.
    pub fn slot_count(&self) -> usize {
        self.inner.slot_count
    }

    /// False once the owning strategy has stopped.
    pub fn is_valid(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    // == Tick (crate-internal) ==
    /// Rotates buckets and sweeps the oldest one. Invoked by the owning
    /// strategy's ticker, never by application code.
    pub(crate) fn tick(&self) -> Result<usize> {
        self.inner.do_tick()
    }

    /// Test-only constructor that skips strategy registration, so unit and
    /// property tests can drive `tick` deterministically without a live
    /// ticker task.
    #[cfg(test)]
    pub(crate) fn detached(name: &str, timeout: Duration, precision: Duration) -> Self {
        let slot_count = crate::strategy::compute_slot_count(timeout, precision);
        Self {
            inner: Arc::new(FolderInner {
                name: name.to_string(),
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                timeout,
                precision,
                slot_count,
                state: Mutex::new(Some(FolderState {
                    hot: HashMap::new(),
                    aging: (0..slot_count).map(|_| HashMap::new()).collect(),
                    listeners: Vec::new(),
                    stats: CacheStats::new(),
                })),
            }),
        }
    }
}

impl<K, V> PartialEq for ExpiryFolder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Structural comparison: bucket-by-bucket, entries compared by wrapped
    /// value. Both folder locks are taken in instance order. Two
    /// invalidated folders compare equal; an invalidated folder never
    /// equals a live one. Names do not participate.
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }

        let (first, second) = if self.inner.instance < other.inner.instance {
            (&self.inner, &other.inner)
        } else {
            (&other.inner, &self.inner)
        };
        let first_guard = first.state.lock();
        let second_guard = second.state.lock();

        match (first_guard.as_ref(), second_guard.as_ref()) {
            (Some(a), Some(b)) => a.hot == b.hot && a.aging == b.aging,
            (None, None) => true,
            _ => false,
        }
    }
}

impl<K, V> std::fmt::Debug for ExpiryFolder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryFolder")
            .field("name", &self.inner.name)
            .field("slot_count", &self.inner.slot_count)
            .field("valid", &self.inner.state.lock().is_some())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::FnListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// Detached folder with a timeout far in the future, for tests that
    /// exercise pure bucket mechanics without wall-clock expiry.
    fn structural_folder() -> ExpiryFolder<String, String> {
        // 10s / 5s -> 2 aging buckets
        ExpiryFolder::detached("structural", ms(10_000), ms(5_000))
    }

    /// Listener that counts calls and remembers every expired key.
    fn recording_listener(
    ) -> (Arc<dyn ExpiryListener<String, String>>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let keys = Arc::new(Mutex::new(Vec::new()));
        let calls2 = Arc::clone(&calls);
        let keys2 = Arc::clone(&keys);
        let listener: Arc<dyn ExpiryListener<String, String>> =
            Arc::new(FnListener(move |_folder: &str, expired: &HashMap<String, String>| {
                calls2.fetch_add(1, Ordering::SeqCst);
                keys2.lock().extend(expired.keys().cloned());
            }));
        (listener, calls, keys)
    }

    #[test]
    fn test_put_then_get() {
        let folder = structural_folder();

        folder.put("key1".to_string(), "value1".to_string()).unwrap();
        let value = folder.get(&"key1".to_string()).unwrap();

        assert_eq!(value, Some("value1".to_string()));
        assert_eq!(folder.len().unwrap(), 1);
    }

    #[test]
    fn test_get_missing_key_is_not_an_error() {
        let folder = structural_folder();
        assert_eq!(folder.get(&"nope".to_string()).unwrap(), None);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let folder = structural_folder();

        folder.put("k".to_string(), "v1".to_string()).unwrap();
        folder.put("k".to_string(), "v2".to_string()).unwrap();

        assert_eq!(folder.get(&"k".to_string()).unwrap(), Some("v2".to_string()));
        assert_eq!(folder.len().unwrap(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let folder = structural_folder();

        assert_eq!(folder.remove(&"absent".to_string()).unwrap(), None);

        folder.put("k".to_string(), "v".to_string()).unwrap();
        assert_eq!(folder.remove(&"k".to_string()).unwrap(), Some("v".to_string()));
        assert_eq!(folder.remove(&"k".to_string()).unwrap(), None);
        assert_eq!(folder.get(&"k".to_string()).unwrap(), None);
    }

    #[test]
    fn test_remove_clears_orphaned_aging_copy() {
        let folder = structural_folder();
        let (listener, calls, _keys) = recording_listener();
        folder.add_listener(listener).unwrap();

        folder.put("k".to_string(), "v1".to_string()).unwrap();
        folder.tick().unwrap(); // v1 now sits in the front aging bucket
        folder.put("k".to_string(), "v2".to_string()).unwrap(); // v1 orphaned

        assert_eq!(folder.remove(&"k".to_string()).unwrap(), Some("v2".to_string()));
        assert_eq!(folder.len().unwrap(), 0);

        // A full rotation must not resurrect or report the orphan.
        for _ in 0..3 {
            folder.tick().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_entry_expires_after_full_rotation() {
        // 80ms timeout / 40ms precision -> 2 aging buckets
        let folder: ExpiryFolder<String, String> = ExpiryFolder::detached("rot", ms(80), ms(40));
        let (listener, calls, keys) = recording_listener();
        folder.add_listener(listener).unwrap();

        folder.put("k".to_string(), "v".to_string()).unwrap();

        folder.tick().unwrap();
        sleep(ms(45));
        folder.tick().unwrap();
        sleep(ms(45));
        // Third tick rotates the entry out; by now its deadline has passed.
        folder.tick().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*keys.lock(), vec!["k".to_string()]);
        assert_eq!(folder.get(&"k".to_string()).unwrap(), None);
        assert_eq!(folder.stats().unwrap().expirations, 1);
    }

    #[test]
    fn test_get_promotes_and_resets_aging_position() {
        let folder = structural_folder();
        let (listener, calls, _keys) = recording_listener();
        folder.add_listener(listener).unwrap();

        folder.put("k".to_string(), "v".to_string()).unwrap();
        folder.tick().unwrap();
        folder.tick().unwrap(); // entry now in the oldest aging bucket

        // Touching read promotes it back into the hot bucket.
        assert_eq!(folder.get(&"k".to_string()).unwrap(), Some("v".to_string()));

        // A fresh full pass is needed again before it can be evicted.
        folder.tick().unwrap();
        folder.tick().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(folder.find(&"k".to_string()).unwrap(), Some("v".to_string()));

        folder.tick().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_find_does_not_promote() {
        let folder = structural_folder();
        let (listener, calls, _keys) = recording_listener();
        folder.add_listener(listener).unwrap();

        folder.put("k".to_string(), "v".to_string()).unwrap();
        folder.tick().unwrap();
        folder.tick().unwrap();

        // find sees the entry but leaves it in the oldest bucket...
        assert_eq!(folder.find(&"k".to_string()).unwrap(), Some("v".to_string()));

        // ...so the very next tick still evicts it.
        folder.tick().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(folder.get(&"k".to_string()).unwrap(), None);
    }

    #[test]
    fn test_lazy_expiry_reads_miss_but_sweep_reports() {
        // 30ms timeout / 15ms precision -> 2 aging buckets
        let folder: ExpiryFolder<String, String> = ExpiryFolder::detached("lazy", ms(30), ms(15));
        let (listener, _calls, keys) = recording_listener();
        folder.add_listener(listener).unwrap();

        folder.put("k".to_string(), "v".to_string()).unwrap();
        sleep(ms(50));

        // Past its deadline but not yet swept: logically absent.
        assert_eq!(folder.get(&"k".to_string()).unwrap(), None);
        assert_eq!(folder.find(&"k".to_string()).unwrap(), None);
        assert_eq!(folder.len().unwrap(), 0);
        assert_eq!(folder.remove(&"nothing".to_string()).unwrap(), None);

        // The bulk sweep still reports it, proving it was physically there.
        for _ in 0..3 {
            folder.tick().unwrap();
        }
        assert_eq!(*keys.lock(), vec!["k".to_string()]);
    }

    #[test]
    fn test_expired_entry_remove_returns_none() {
        let folder: ExpiryFolder<String, String> = ExpiryFolder::detached("exp", ms(20), ms(10));

        folder.put("k".to_string(), "v".to_string()).unwrap();
        sleep(ms(35));

        // Physically present, logically expired.
        assert_eq!(folder.remove(&"k".to_string()).unwrap(), None);
    }

    #[test]
    fn test_len_counts_each_key_once() {
        let folder = structural_folder();

        folder.put("a".to_string(), "1".to_string()).unwrap();
        folder.put("b".to_string(), "2".to_string()).unwrap();
        folder.tick().unwrap();
        // "a" gets a fresh hot copy; its aging copy is now an orphan.
        folder.put("a".to_string(), "1b".to_string()).unwrap();

        assert_eq!(folder.len().unwrap(), 2);
        assert!(!folder.is_empty().unwrap());
    }

    #[test]
    fn test_listener_multiset_registration() {
        let folder: ExpiryFolder<String, String> = ExpiryFolder::detached("multi", ms(40), ms(20));
        let (listener, calls, _keys) = recording_listener();

        folder.add_listener(Arc::clone(&listener)).unwrap();
        folder.add_listener(Arc::clone(&listener)).unwrap();

        folder.put("k1".to_string(), "v".to_string()).unwrap();
        sleep(ms(50));
        for _ in 0..3 {
            folder.tick().unwrap();
        }
        // Registered twice: two calls for the single batch.
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        folder.remove_listener(&listener).unwrap();
        folder.put("k2".to_string(), "v".to_string()).unwrap();
        sleep(ms(50));
        for _ in 0..3 {
            folder.tick().unwrap();
        }
        // One registration left: one more call.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_unregistered_listener_is_noop() {
        let folder = structural_folder();
        let (listener, _calls, _keys) = recording_listener();
        folder.remove_listener(&listener).unwrap();
    }

    #[test]
    fn test_no_notification_for_empty_batch() {
        let folder = structural_folder();
        let (listener, calls, _keys) = recording_listener();
        folder.add_listener(listener).unwrap();

        folder.tick().unwrap();
        folder.tick().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_copy_into_rejects_self() {
        let folder = structural_folder();
        let result = folder.copy_into(&folder);
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));

        // A cloned handle is still the same folder.
        let alias = folder.clone();
        assert!(matches!(
            folder.copy_into(&alias),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_copy_into_rejects_precision_mismatch() {
        let a: ExpiryFolder<String, String> = ExpiryFolder::detached("a", ms(1000), ms(100));
        let b: ExpiryFolder<String, String> = ExpiryFolder::detached("b", ms(1000), ms(200));

        assert!(matches!(
            a.copy_into(&b),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_copy_snapshots_and_then_diverges() {
        let a = structural_folder();
        let b: ExpiryFolder<String, String> =
            ExpiryFolder::detached("target", ms(10_000), ms(5_000));

        a.put("hot".to_string(), "h".to_string()).unwrap();
        a.put("aged".to_string(), "g".to_string()).unwrap();
        a.tick().unwrap(); // both move to the front aging bucket
        a.put("hot".to_string(), "h2".to_string()).unwrap();

        a.copy_into(&b).unwrap();
        assert_eq!(b.get(&"hot".to_string()).unwrap(), Some("h2".to_string()));
        assert_eq!(b.get(&"aged".to_string()).unwrap(), Some("g".to_string()));

        // Post-copy mutation of the source must not leak into the target.
        a.put("later".to_string(), "x".to_string()).unwrap();
        assert_eq!(b.get(&"later".to_string()).unwrap(), None);
    }

    #[test]
    fn test_copy_allows_different_timeouts_same_precision() {
        // Same precision, different slot counts: only the shared prefix of
        // aging buckets is replaced.
        let a: ExpiryFolder<String, String> = ExpiryFolder::detached("a", ms(400), ms(100));
        let b: ExpiryFolder<String, String> = ExpiryFolder::detached("b", ms(200), ms(100));

        a.put("k".to_string(), "v".to_string()).unwrap();
        a.copy_into(&b).unwrap();
        assert_eq!(b.get(&"k".to_string()).unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_structural_equality() {
        let a = structural_folder();
        let b: ExpiryFolder<String, String> =
            ExpiryFolder::detached("other-name", ms(10_000), ms(5_000));

        // Both empty: equal despite different names.
        assert_eq!(a, b);

        a.put("k".to_string(), "v".to_string()).unwrap();
        assert_ne!(a, b);

        b.put("k".to_string(), "v".to_string()).unwrap();
        assert_eq!(a, b);

        // Same content in a different bucket position is not equal.
        a.tick().unwrap();
        assert_ne!(a, b);

        // Deadlines never participate, values do.
        b.put("k".to_string(), "other".to_string()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tick_fails_after_invalidation() {
        let folder = structural_folder();
        folder.put("k".to_string(), "v".to_string()).unwrap();

        TickRecipient::strategy_stopped(&*folder.inner);

        assert!(!folder.is_valid());
        assert!(matches!(folder.tick(), Err(CacheError::IllegalState(_))));
        assert!(matches!(
            folder.get(&"k".to_string()),
            Err(CacheError::IllegalState(_))
        ));
        assert!(matches!(
            folder.put("x".to_string(), "y".to_string()),
            Err(CacheError::IllegalState(_))
        ));
        assert!(matches!(folder.len(), Err(CacheError::IllegalState(_))));
        assert!(matches!(folder.stats(), Err(CacheError::IllegalState(_))));
    }

    #[test]
    fn test_invalidated_folders_compare_equal() {
        let a = structural_folder();
        let b = structural_folder();
        a.put("k".to_string(), "v".to_string()).unwrap();

        TickRecipient::strategy_stopped(&*a.inner);
        assert_ne!(a, b);

        TickRecipient::strategy_stopped(&*b.inner);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let strategy = ExpiryStrategy::new(ms(1000), ms(500)).unwrap();
        let result: Result<ExpiryFolder<String, String>> = ExpiryFolder::new("  ", &strategy);
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
        strategy.stop().unwrap();
    }

    #[tokio::test]
    async fn test_folder_allocates_strategy_slot_count() {
        let strategy = ExpiryStrategy::new(ms(1000), ms(300)).unwrap();
        let folder: ExpiryFolder<String, String> =
            ExpiryFolder::new("sized", &strategy).unwrap();
        assert_eq!(folder.slot_count(), 4);
        assert_eq!(folder.timeout(), ms(1000));
        assert_eq!(folder.precision(), ms(300));
        assert_eq!(folder.name(), "sized");
        strategy.stop().unwrap();
    }
}
