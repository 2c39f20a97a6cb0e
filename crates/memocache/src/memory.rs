use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::Shared;
use rustc_hash::FxHashMap;

use crate::error::CacheContents;
use crate::lru::LruStore;

/// The population future for one missing key, shared between all callers that
/// were coalesced onto it.
type SharedPopulation<V> = Shared<Pin<Box<dyn Future<Output = CacheContents<V>> + Send>>>;

/// An in-flight population for a key that is not currently in the cache.
///
/// At most one of these exists per key at any time. The generation id guards
/// the commit: if the slot was detached in the meantime (by a manual
/// [`BoundedCache::insert`], or replaced by a later population), the resolved
/// result is still delivered to its waiters but no longer committed.
struct Pending<V> {
    generation: u64,
    future: SharedPopulation<V>,
}

struct Inner<K, V> {
    store: LruStore<K, V>,
    pending: FxHashMap<K, Pending<V>>,
    /// Bumped by [`BoundedCache::clear`]. Populations registered under an
    /// older epoch resolve normally but skip their commit.
    epoch: u64,
    next_generation: u64,
}

/// A bounded, thread-safe in-memory cache with cost-based LRU eviction and
/// deduplicated asynchronous population.
///
/// The capacity is a cost budget: every entry carries an integer weight
/// (typically its byte size), and the sum of all weights never exceeds the
/// budget after an insertion completes, except for the documented
/// oversized-entry case on [`insert`](Self::insert).
///
/// Concurrent [`compute_memoized`](Self::compute_memoized) calls for the same
/// missing key are coalesced: only one execution of the computation runs, and
/// every caller receives its result, value or error alike.
///
/// The cache is cheap to clone; clones share the same underlying state.
pub struct BoundedCache<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Clone for BoundedCache<K, V> {
    fn clone(&self) -> Self {
        BoundedCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("BoundedCache");
        match self.inner.try_lock() {
            Ok(inner) => dbg
                .field("capacity", &inner.store.capacity())
                .field("total_cost", &inner.store.total_cost())
                .field("entries", &inner.store.len())
                .field("pending populations", &inner.pending.len())
                .finish(),
            Err(_) => dbg.finish_non_exhaustive(),
        }
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache with the given cost budget. The budget is fixed for
    /// the cache's lifetime.
    pub fn new(capacity: u64) -> Self {
        BoundedCache {
            inner: Arc::new(Mutex::new(Inner {
                store: LruStore::new(capacity),
                pending: FxHashMap::default(),
                epoch: 0,
                next_generation: 0,
            })),
        }
    }

    /// Looks up a value, marking the entry as most-recently-used on a hit.
    ///
    /// This never suspends and never populates; absence is a normal result.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        inner.store.get(key).cloned()
    }

    /// Unconditionally installs or overwrites an entry, evicting
    /// least-recently-used entries as needed.
    ///
    /// Overwriting subtracts the old cost before adding the new one. An entry
    /// whose cost alone exceeds the capacity is still admitted: eviction then
    /// removes everything else and the cache degrades to holding just that
    /// one entry until something newer pushes it out.
    ///
    /// A manual insert supersedes any in-flight population for the key. That
    /// population still resolves and its waiters receive its result, but the
    /// result is not committed.
    pub fn insert(&self, key: K, value: V, cost: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.remove(&key);
        inner.store.insert(key, value, cost);
    }

    /// Removes the entry for `key` if present. Removing an absent key is a
    /// no-op.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        inner.store.remove(key)
    }

    /// Removes all entries and resets the total cost to zero.
    ///
    /// In-flight populations are not interrupted: they still resolve and
    /// their waiters receive the result, but results of populations started
    /// before the `clear` are discarded instead of being committed, so no
    /// stale value re-enters the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.store.clear();
        inner.epoch += 1;
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().unwrap().store.contains_key(key)
    }

    pub fn capacity(&self) -> u64 {
        self.inner.lock().unwrap().store.capacity()
    }

    /// The sum of all live entries' costs.
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().unwrap().store.total_cost()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().store.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn pending_population_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value for `key`, computing it at most once across all
    /// concurrent callers.
    ///
    /// * On a hit, the entry is marked most-recently-used and a clone of its
    ///   value is returned without suspending.
    /// * If a population for `key` is already in flight, this call joins it
    ///   and receives the same result, value or error, once it resolves. The
    ///   `compute` closure is not invoked.
    /// * Otherwise this caller becomes the populator: `compute` is invoked,
    ///   and on success the result is committed with the cost returned by
    ///   `weight`, evicting older entries as needed. On error nothing is
    ///   cached and every waiter receives the same [`CacheError`]; the cache
    ///   is left exactly as it was, so the caller can safely retry.
    ///
    /// The computation is not bound to the populator's lifetime: it is a
    /// shared future driven by whichever waiter polls it. If the original
    /// populator is cancelled, the remaining waiters carry the computation to
    /// completion; if all of them are cancelled, the next caller for the same
    /// key resumes it. Waiters never observe a synthetic cancellation error.
    ///
    /// [`CacheError`]: crate::CacheError
    pub async fn compute_memoized<F, Fut, W>(
        &self,
        key: K,
        compute: F,
        weight: W,
    ) -> CacheContents<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<V>> + Send + 'static,
        W: FnOnce(&V) -> u64 + Send + 'static,
    {
        // Calling `compute` only constructs the future, it does not run it,
        // so doing it under the lock is fine. The future itself is always
        // awaited outside the lock.
        let future = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(value) = inner.store.get(&key) {
                return Ok(value.clone());
            }

            if let Some(pending) = inner.pending.get(&key) {
                tracing::trace!("joining in-flight population");
                pending.future.clone()
            } else {
                let generation = inner.next_generation;
                inner.next_generation += 1;
                let epoch = inner.epoch;

                tracing::trace!("starting fresh population");
                let future = Self::populate(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    generation,
                    epoch,
                    compute(),
                    weight,
                );
                inner.pending.insert(
                    key,
                    Pending {
                        generation,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        future.await
    }

    /// Wraps a computation into the shared future that clears the pending
    /// slot and commits the result once the computation resolves.
    ///
    /// The future is itself stored in the pending table, so it only holds a
    /// [`Weak`] reference to the cache state; a population that never
    /// resolves does not keep a dropped cache alive.
    fn populate<Fut, W>(
        inner: Weak<Mutex<Inner<K, V>>>,
        key: K,
        generation: u64,
        epoch: u64,
        computation: Fut,
        weight: W,
    ) -> SharedPopulation<V>
    where
        Fut: Future<Output = CacheContents<V>> + Send + 'static,
        W: FnOnce(&V) -> u64 + Send + 'static,
    {
        let future: Pin<Box<dyn Future<Output = CacheContents<V>> + Send>> =
            Box::pin(async move {
                let result = computation.await;

                // Every cache handle may be gone by now; the result is then
                // only delivered to the remaining waiters.
                let Some(inner) = inner.upgrade() else {
                    return result;
                };
                let mut inner = inner.lock().unwrap();
                let still_registered = inner
                    .pending
                    .get(&key)
                    .is_some_and(|pending| pending.generation == generation);
                if still_registered {
                    inner.pending.remove(&key);
                }

                match &result {
                    Ok(value) => {
                        if still_registered && inner.epoch == epoch {
                            let cost = weight(value);
                            tracing::trace!(cost, "committing population result");
                            inner.store.insert(key, value.clone(), cost);
                        } else {
                            tracing::trace!(
                                "discarding population result; the cache was cleared or the key was overwritten"
                            );
                        }
                    }
                    Err(error) => {
                        tracing::trace!(%error, "population failed; nothing cached");
                    }
                }

                result
            });
        future.shared()
    }
}
