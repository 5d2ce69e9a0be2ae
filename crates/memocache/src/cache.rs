//! MemoCache: concurrency-safe memoizing cache with single-flight misses

use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::{BuildHasher, Hash};

use ahash::RandomState;
use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{ComputeError, Error};
use crate::lru::LruCache;
use crate::stats::CacheStats;

/// Outcome of one in-flight computation.
enum FlightState<V> {
    /// The owning caller is still running its compute function
    Running,
    /// Computation produced a value (already installed in the entry table)
    Done(V),
    /// Computation failed; no value was produced
    Failed,
}

/// Transient per-key marker for a computation in progress.
///
/// The slot is freed by the resolving caller when nobody waits on it,
/// otherwise by the last waiter to drain.
struct Flight<V> {
    state: FlightState<V>,
    waiters: usize,
}

/// Shared mutable state: the entry table and the in-flight marker set.
///
/// Both live under one mutex so that presence checks, flight registration
/// and result installation are a single atomic step.
struct Inner<K, V, S> {
    entries: LruCache<K, V, S>,
    flights: HashMap<K, Flight<V>, S>,
}

/// Concurrency-safe memoizing cache with LRU eviction.
///
/// Maps keys to lazily computed values under a capacity bound (`0` =
/// unbounded). Concurrent [`get_or_compute`](MemoCache::get_or_compute)
/// calls for the same missing key run the compute function exactly once;
/// the losers wait and receive the winner's result. Compute functions run
/// outside the table lock, so misses on different keys never block each
/// other.
///
/// The hash strategy is pluggable via the `S` type parameter (default:
/// [`ahash::RandomState`]); the equality strategy is the key type's [`Eq`]
/// implementation. Values are returned by clone, so `V` is typically cheap
/// to clone or an `Arc`.
///
/// # Examples
/// ```
/// use memocache::MemoCache;
///
/// let cache: MemoCache<u32, String> = MemoCache::with_capacity(128);
///
/// let value = cache.get_or_insert_with(42, |n| n.to_string());
/// assert_eq!(value, "42");
///
/// // Second call is a hit; the closure does not run again
/// let value = cache.get_or_insert_with(42, |_| unreachable!());
/// assert_eq!(value, "42");
/// ```
pub struct MemoCache<K, V, S = RandomState> {
    inner: Mutex<Inner<K, V, S>>,
    /// Signalled whenever a flight resolves or its slot is freed
    flight_resolved: Condvar,
    stats: CacheStats,
}

impl<K, V> MemoCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create an unbounded cache with the default hasher.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a cache holding at most `capacity` entries (`0` = unbounded).
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_hasher(capacity, RandomState::new())
    }
}

impl<K, V> Default for MemoCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> MemoCache<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    /// Create a cache with a caller-supplied hash strategy.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of entries (`0` = unbounded)
    /// * `hasher` - Hash builder for the entry table and in-flight set
    pub fn with_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::with_hasher(capacity, hasher.clone()),
                flights: HashMap::with_hasher(hasher),
            }),
            flight_resolved: Condvar::new(),
            stats: CacheStats::new(),
        }
    }

    /// Get the cached value for `key`, computing it on a miss.
    ///
    /// On a hit the recency is refreshed and `compute` is not invoked. On a
    /// miss, if no other caller is computing this key, `compute` runs on the
    /// calling thread *without* the table lock held and its result is
    /// installed as a new entry (evicting the least-recently-used entry if
    /// needed). If another caller is already computing this key, the call
    /// blocks until that computation resolves and returns the same value.
    ///
    /// A failed computation installs nothing and is not cached: the caller
    /// that ran `compute` gets [`ComputeError::Compute`], waiters get
    /// [`ComputeError::FlightFailed`], and a later call starts over.
    ///
    /// `compute` must not call back into this cache for the same key; doing
    /// so deadlocks against the key's own in-flight marker.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `compute` - Fallible producer of the value for `key`; may be
    ///   expensive (I/O, heavy calculation)
    pub fn get_or_compute<F, E>(&self, key: K, compute: F) -> Result<V, ComputeError<E>>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.entries.get(&key) {
                self.stats.record_hit();
                return Ok(value.clone());
            }

            match inner.flights.get_mut(&key) {
                // No entry and no flight: this caller computes
                None => break,
                Some(flight) => match flight.state {
                    FlightState::Running => {
                        flight.waiters += 1;
                        return match self.await_flight(&mut inner, &key) {
                            Some(value) => {
                                self.stats.record_coalesced();
                                Ok(value)
                            }
                            None => Err(ComputeError::FlightFailed),
                        };
                    }
                    // A resolved flight still draining its registered
                    // waiters; its result belongs to them alone. Wait for
                    // the slot to free and start over, so that a flush
                    // between resolution and drain is honored and a failure
                    // is not cached
                    FlightState::Done(_) | FlightState::Failed => {
                        self.flight_resolved.wait(&mut inner);
                    }
                },
            }
        }

        self.stats.record_miss();
        inner.flights.insert(
            key.clone(),
            Flight {
                state: FlightState::Running,
                waiters: 0,
            },
        );
        trace!("starting computation for missing key");
        drop(inner);

        let result = compute(&key);

        let mut inner = self.inner.lock();
        match result {
            Ok(value) => {
                let evicted = inner.entries.insert(key.clone(), value.clone());
                self.stats.record_insert();
                self.stats.record_evictions(evicted as u64);
                self.resolve_flight(&mut inner, &key, FlightState::Done(value.clone()));
                Ok(value)
            }
            Err(err) => {
                debug!("computation failed; no entry installed");
                self.resolve_flight(&mut inner, &key, FlightState::Failed);
                Err(ComputeError::Compute(err))
            }
        }
    }

    /// Get the cached value for `key`, computing it with an infallible
    /// closure on a miss.
    ///
    /// Same single-flight behavior as
    /// [`get_or_compute`](MemoCache::get_or_compute). If this call loses the
    /// race to another caller whose computation fails, it retries with its
    /// own closure, so it always returns a value.
    pub fn get_or_insert_with<F>(&self, key: K, mut compute: F) -> V
    where
        F: FnMut(&K) -> V,
    {
        loop {
            match self.get_or_compute(key.clone(), |k| Ok::<V, Infallible>(compute(k))) {
                Ok(value) => return value,
                Err(ComputeError::Compute(never)) => match never {},
                // Another caller's flight failed; the miss is still open
                Err(ComputeError::FlightFailed) => continue,
            }
        }
    }

    /// Look up a key, refreshing its recency on a hit.
    ///
    /// Never computes, never evicts, and never blocks on in-flight
    /// computations; the table lock is held only briefly.
    pub fn lookup(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(value) => {
                self.stats.record_hit();
                Some(value.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Look up a key, failing with [`Error::NotFound`] on a miss.
    ///
    /// Same semantics as [`lookup`](MemoCache::lookup) otherwise.
    pub fn get(&self, key: &K) -> Result<V, Error> {
        self.lookup(key).ok_or(Error::NotFound)
    }

    /// Insert or overwrite the entry for `key`, refreshing its recency.
    ///
    /// May evict the least-recently-used entry to stay within capacity.
    /// Ignores in-flight markers: a concurrent `get_or_compute` miss for the
    /// same key may overwrite this value with its own result, or vice versa
    /// (last writer wins by completion order).
    pub fn add(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let evicted = inner.entries.insert(key, value);
        self.stats.record_insert();
        self.stats.record_evictions(evicted as u64);
        if evicted > 0 {
            trace!("insert evicted {} entries", evicted);
        }
    }

    /// Get the number of currently cached entries.
    ///
    /// Keys with only an in-flight computation are not counted.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Check whether `key` is cached.
    ///
    /// Does *not* refresh the key's recency; use
    /// [`lookup`](MemoCache::lookup) for a refreshing probe.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.peek(key).is_some()
    }

    /// Get a snapshot of the cached keys, most recently used first.
    ///
    /// The snapshot is taken under the table lock, so it is a consistent
    /// view; concurrent mutation may invalidate it immediately afterwards.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Get the capacity bound (`0` = unbounded)
    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.capacity()
    }

    /// Change the capacity bound (`0` = unbounded).
    ///
    /// Shrinking below the current size evicts least-recently-used entries
    /// until the cache fits.
    pub fn reserve(&self, new_capacity: usize) {
        let mut inner = self.inner.lock();
        let evicted = inner.entries.set_capacity(new_capacity);
        self.stats.record_evictions(evicted as u64);
        debug!(
            "capacity set to {} ({} entries evicted)",
            new_capacity, evicted
        );
    }

    /// Remove all entries and reset the statistics.
    ///
    /// Computations already in flight are not cancelled; they complete for
    /// the callers already waiting on them and may repopulate the cache.
    /// Callers arriving after the flush always recompute.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        self.stats.reset();
        debug!("cache flushed");
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Block until the flight for `key` resolves.
    ///
    /// The caller must already be registered as a waiter. Returns the
    /// computed value, or `None` if the computation failed. The last waiter
    /// to drain frees the slot and wakes callers queued behind it.
    fn await_flight(&self, inner: &mut MutexGuard<'_, Inner<K, V, S>>, key: &K) -> Option<V> {
        loop {
            self.flight_resolved.wait(inner);

            let flight = match inner.flights.get_mut(key) {
                Some(flight) => flight,
                // Registered waiters keep the slot alive until they drain
                None => unreachable!("in-flight marker vanished with registered waiters"),
            };

            let outcome = match flight.state {
                FlightState::Running => continue,
                FlightState::Done(ref value) => Some(value.clone()),
                FlightState::Failed => None,
            };

            flight.waiters -= 1;
            let drained = flight.waiters == 0;
            if drained {
                inner.flights.remove(key);
                self.flight_resolved.notify_all();
            }
            return outcome;
        }
    }

    /// Publish the outcome of this caller's flight and wake its waiters.
    ///
    /// Frees the slot immediately when nobody is waiting on it.
    fn resolve_flight(&self, inner: &mut Inner<K, V, S>, key: &K, state: FlightState<V>) {
        let drained = match inner.flights.get_mut(key) {
            Some(flight) => {
                if flight.waiters == 0 {
                    true
                } else {
                    flight.state = state;
                    false
                }
            }
            None => unreachable!("in-flight marker vanished while computing"),
        };
        if drained {
            inner.flights.remove(key);
        }
        self.flight_resolved.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::hash::BuildHasherDefault;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let cache = MemoCache::new();

        cache.add("a", 1);
        cache.add("b", 2);

        assert_eq!(cache.lookup(&"a"), Some(1));
        assert_eq!(cache.lookup(&"b"), Some(2));
        assert_eq!(cache.lookup(&"c"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_not_found() {
        let cache: MemoCache<&str, i32> = MemoCache::new();

        cache.add("a", 1);

        assert_eq!(cache.get(&"a"), Ok(1));
        assert_eq!(cache.get(&"b"), Err(Error::NotFound));
    }

    #[test]
    fn test_lookup_returns_value_until_overwritten() {
        let cache = MemoCache::new();

        cache.add("a", 1);
        assert_eq!(cache.lookup(&"a"), Some(1));

        cache.add("a", 2);
        assert_eq!(cache.lookup(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_bound_holds() {
        let cache = MemoCache::with_capacity(2);

        cache.add("a", 1);
        cache.add("b", 2);
        cache.add("c", 3);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&"a")); // a was least recently used
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn test_eviction_respects_access_order() {
        let cache = MemoCache::with_capacity(2);

        cache.add("a", 1);
        cache.add("b", 2);
        assert_eq!(cache.lookup(&"a"), Some(1)); // refresh a
        cache.add("c", 3); // evicts b, not a

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn test_contains_does_not_refresh() {
        let cache = MemoCache::with_capacity(2);

        cache.add("a", 1);
        cache.add("b", 2);
        assert!(cache.contains(&"a")); // must not refresh a
        cache.add("c", 3); // still evicts a

        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let cache = MemoCache::new();

        for i in 0..10_000 {
            cache.add(i, i);
        }

        assert_eq!(cache.len(), 10_000);
        assert_eq!(cache.capacity(), 0);
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[test]
    fn test_keys_most_recent_first() {
        let cache = MemoCache::new();

        cache.add("a", 1);
        cache.add("b", 2);
        cache.add("c", 3);
        assert_eq!(cache.lookup(&"a"), Some(1));

        assert_eq!(cache.keys(), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_reserve_shrinks_to_new_capacity() {
        let cache = MemoCache::with_capacity(4);

        for i in 0..4 {
            cache.add(i, i);
        }
        cache.reserve(2);

        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.len(), 2);
        // Most recently inserted entries survive
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn test_reserve_zero_disables_eviction() {
        let cache = MemoCache::with_capacity(2);

        cache.add(0, 0);
        cache.add(1, 1);
        cache.reserve(0);

        for i in 2..100 {
            cache.add(i, i);
        }

        assert_eq!(cache.len(), 100);
        assert!(cache.contains(&0));
    }

    #[test]
    fn test_flush() {
        let cache = MemoCache::with_capacity(8);

        cache.add("a", 1);
        cache.add("b", 2);
        cache.flush();

        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&"a"), None);
        assert_eq!(cache.capacity(), 8); // capacity survives a flush
    }

    #[test]
    fn test_get_or_compute_installs_on_miss() {
        let cache = MemoCache::new();

        let value = cache
            .get_or_compute(7, |k| Ok::<String, Infallible>(k.to_string()))
            .unwrap();

        assert_eq!(value, "7");
        assert_eq!(cache.lookup(&7), Some("7".to_string()));
        assert_eq!(cache.stats().inserts(), 1);
    }

    #[test]
    fn test_get_or_compute_hit_skips_compute() {
        let cache = MemoCache::new();
        let calls = AtomicUsize::new(0);

        cache.add(7, "seven");
        let value = cache
            .get_or_compute(7, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<&str, Infallible>("recomputed")
            })
            .unwrap();

        assert_eq!(value, "seven");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_or_compute_failure_not_cached() {
        let cache: MemoCache<&str, i32> = MemoCache::new();

        let result = cache.get_or_compute("k", |_| Err("boom"));
        assert_eq!(result, Err(ComputeError::Compute("boom")));
        assert!(!cache.contains(&"k"));
        assert_eq!(cache.len(), 0);

        // The key is computable again after the failure
        let value = cache.get_or_compute("k", |_| Ok::<i32, &str>(9)).unwrap();
        assert_eq!(value, 9);
        assert!(cache.contains(&"k"));
    }

    #[test]
    fn test_get_or_compute_evicts_under_pressure() {
        let cache = MemoCache::with_capacity(2);

        for i in 0..5 {
            cache
                .get_or_compute(i, |k| Ok::<i32, Infallible>(k * 10))
                .unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&3));
        assert!(cache.contains(&4));
        assert_eq!(cache.stats().evictions(), 3);
    }

    #[test]
    fn test_get_or_insert_with() {
        let cache = MemoCache::new();

        assert_eq!(cache.get_or_insert_with(3, |k| k + 1), 4);
        assert_eq!(cache.get_or_insert_with(3, |_| unreachable!()), 4);
    }

    #[test]
    fn test_custom_hasher() {
        type FnvLike = BuildHasherDefault<std::collections::hash_map::DefaultHasher>;

        let cache: MemoCache<String, u32, FnvLike> =
            MemoCache::with_hasher(2, FnvLike::default());

        cache.add("a".to_string(), 1);
        cache.add("b".to_string(), 2);
        cache.add("c".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&"a".to_string()));
    }

    #[test]
    fn test_stats_tracking() {
        let cache = MemoCache::with_capacity(2);

        cache.add("a", 1);
        assert_eq!(cache.lookup(&"a"), Some(1)); // hit
        assert_eq!(cache.lookup(&"b"), None); // miss
        cache.add("b", 2);
        cache.add("c", 3); // evicts a

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().inserts(), 3);
        assert_eq!(cache.stats().evictions(), 1);
        assert_eq!(cache.stats().hit_ratio(), 0.5);
    }
}
