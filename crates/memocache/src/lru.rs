//! Cost-aware LRU bookkeeping.
//!
//! This is the synchronous core of the cache: an entry table plus a recency
//! index, with a running total of entry costs that is kept within a fixed
//! capacity by evicting the least-recently-used entries.
//!
//! Recency values are drawn from a single strictly increasing counter, so they
//! are unique per store. Eviction order is therefore fully deterministic:
//! insertion order doubles as the tie-break, because every insertion and every
//! read bumps the counter.

use std::collections::BTreeMap;
use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    cost: u64,
    recency: u64,
}

/// A bounded store of keyed entries with cost-based LRU eviction.
///
/// The store is exclusively owned by [`BoundedCache`](crate::BoundedCache) and
/// never handed out by reference; callers only ever see cloned values.
#[derive(Debug)]
pub(crate) struct LruStore<K, V> {
    entries: FxHashMap<K, Entry<V>>,
    /// Maps each live entry's recency to its key. The first (smallest) key in
    /// this index is the eviction victim.
    by_recency: BTreeMap<u64, K>,
    total_cost: u64,
    capacity: u64,
    next_recency: u64,
}

impl<K, V> LruStore<K, V> {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: FxHashMap::default(),
            by_recency: BTreeMap::new(),
            total_cost: 0,
            capacity,
            next_recency: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> LruStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Looks up an entry, marking it as most-recently-used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let recency = self.fresh_recency();
        let entry = self.entries.get_mut(key)?;
        self.by_recency.remove(&entry.recency);
        entry.recency = recency;
        self.by_recency.insert(recency, key.clone());
        Some(&entry.value)
    }

    /// Installs or overwrites an entry, evicting least-recently-used entries
    /// as needed to get back under capacity.
    ///
    /// Overwriting subtracts the old cost before adding the new one. An entry
    /// whose cost alone exceeds the capacity is still admitted; eviction then
    /// removes everything else and the store degrades to holding just that one
    /// entry.
    pub fn insert(&mut self, key: K, value: V, cost: u64) -> Option<V> {
        let recency = self.fresh_recency();
        let old = self.entries.insert(
            key.clone(),
            Entry {
                value,
                cost,
                recency,
            },
        );
        if let Some(old) = &old {
            self.by_recency.remove(&old.recency);
            self.total_cost -= old.cost;
        }
        self.by_recency.insert(recency, key);
        self.total_cost += cost;
        self.evict_to_capacity();
        old.map(|entry| entry.value)
    }

    /// Removes an entry if present. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.by_recency.remove(&entry.recency);
        self.total_cost -= entry.cost;
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_recency.clear();
        self.total_cost = 0;
    }

    fn fresh_recency(&mut self) -> u64 {
        let recency = self.next_recency;
        self.next_recency += 1;
        recency
    }

    /// Evicts entries in strict LRU order until the total cost fits the
    /// capacity, or until only the most-recently-inserted entry remains.
    fn evict_to_capacity(&mut self) {
        while self.total_cost > self.capacity && self.entries.len() > 1 {
            let Some((recency, key)) = self.by_recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                tracing::trace!(recency, cost = entry.cost, "evicting LRU entry");
                self.total_cost -= entry.cost;
            }
        }
    }

    /// Checks the internal bookkeeping invariants.
    #[cfg(test)]
    fn assert_invariants(&self) {
        let cost_sum: u64 = self.entries.values().map(|entry| entry.cost).sum();
        assert_eq!(self.total_cost, cost_sum);
        assert_eq!(self.by_recency.len(), self.entries.len());
        for (recency, key) in &self.by_recency {
            assert_eq!(self.entries[key].recency, *recency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: u64) -> LruStore<&'static str, &'static str> {
        LruStore::new(capacity)
    }

    #[test]
    fn test_insert_and_get() {
        let mut store = store(10);
        assert_eq!(store.insert("a", "alpha", 4), None);
        store.assert_invariants();

        assert_eq!(store.get(&"a"), Some(&"alpha"));
        assert_eq!(store.get(&"b"), None);
        assert_eq!(store.total_cost(), 4);
        assert_eq!(store.len(), 1);
        store.assert_invariants();
    }

    #[test]
    fn test_cost_bound_holds_after_every_operation() {
        let mut store = store(10);
        for (key, cost) in [("a", 4), ("b", 4), ("c", 4), ("d", 9), ("e", 2)] {
            store.insert(key, "x", cost);
            assert!(store.total_cost() <= store.capacity());
            store.assert_invariants();
        }
        store.remove(&"e");
        assert!(store.total_cost() <= store.capacity());
        store.assert_invariants();
    }

    #[test]
    fn test_lru_eviction_order() {
        // a, b, c fit exactly; d pushes the total over and evicts a.
        let mut store = store(12);
        store.insert("a", "x", 4);
        store.insert("b", "x", 4);
        store.insert("c", "x", 4);
        assert_eq!(store.total_cost(), 12);

        store.insert("d", "x", 4);
        assert!(!store.contains_key(&"a"));
        assert!(store.contains_key(&"b"));
        assert!(store.contains_key(&"c"));
        assert!(store.contains_key(&"d"));
        assert_eq!(store.total_cost(), 12);
        store.assert_invariants();
    }

    #[test]
    fn test_get_bumps_recency() {
        let mut store = store(10);
        store.insert("a", "x", 4);
        store.insert("b", "x", 4);

        // Touching a makes b the LRU victim for the next eviction.
        store.get(&"a");
        store.insert("c", "x", 4);

        assert!(store.contains_key(&"a"));
        assert!(!store.contains_key(&"b"));
        assert!(store.contains_key(&"c"));
        store.assert_invariants();
    }

    #[test]
    fn test_untouched_oldest_entry_is_evicted_first() {
        // Insertion counts as a touch: with a, b, c inserted in order and
        // nothing read in between, a is the victim.
        let mut store = store(10);
        store.insert("a", "x", 4);
        store.insert("b", "x", 4);
        store.insert("c", "x", 4);

        assert!(!store.contains_key(&"a"));
        assert!(store.contains_key(&"b"));
        assert!(store.contains_key(&"c"));
        assert_eq!(store.total_cost(), 8);
        store.assert_invariants();
    }

    #[test]
    fn test_overwrite_replaces_cost() {
        let mut store = store(10);
        store.insert("a", "v1", 5);
        assert_eq!(store.insert("a", "v2", 3), Some("v1"));

        assert_eq!(store.total_cost(), 3);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"a"), Some(&"v2"));
        store.assert_invariants();
    }

    #[test]
    fn test_oversized_entry_stands_alone() {
        let mut store = store(10);
        store.insert("a", "x", 4);
        store.insert("b", "x", 4);

        // An entry larger than the whole budget is admitted and everything
        // else is evicted.
        store.insert("huge", "x", 15);
        assert_eq!(store.len(), 1);
        assert!(store.contains_key(&"huge"));
        assert_eq!(store.total_cost(), 15);
        store.assert_invariants();

        // A subsequent insertion evicts the oversized entry like any other.
        store.insert("c", "x", 4);
        assert_eq!(store.len(), 1);
        assert!(store.contains_key(&"c"));
        assert_eq!(store.total_cost(), 4);
        store.assert_invariants();
    }

    #[test]
    fn test_exact_capacity_does_not_evict() {
        let mut store = store(10);
        store.insert("a", "x", 6);
        store.insert("b", "x", 4);
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_cost(), 10);
        store.assert_invariants();
    }

    #[test]
    fn test_zero_cost_entries() {
        let mut store = store(10);
        store.insert("a", "x", 0);
        store.insert("b", "x", 10);
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_cost(), 10);
        store.assert_invariants();
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = store(10);
        store.insert("a", "x", 4);

        assert_eq!(store.remove(&"a"), Some("x"));
        assert_eq!(store.remove(&"a"), None);
        assert_eq!(store.total_cost(), 0);
        store.assert_invariants();
    }

    #[test]
    fn test_clear_resets_cost() {
        let mut store = store(10);
        store.insert("a", "x", 4);
        store.insert("b", "x", 4);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_cost(), 0);
        store.assert_invariants();

        // The store remains usable and recency keeps increasing.
        store.insert("c", "x", 4);
        assert_eq!(store.get(&"c"), Some(&"x"));
        store.assert_invariants();
    }
}
