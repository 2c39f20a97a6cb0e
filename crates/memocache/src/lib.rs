//! # memocache
//!
//! A bounded in-memory cache with cost-based LRU eviction and deduplicated
//! asynchronous population.
//!
//! The central type is [`BoundedCache`]. Its capacity is a *cost budget*
//! rather than an item count: every entry carries an integer weight (for
//! example its byte size), and the cache evicts least-recently-used entries
//! whenever the sum of weights exceeds the budget.
//!
//! ## Request coalescing
//!
//! [`BoundedCache::compute_memoized`] deduplicates concurrent accesses: when
//! several callers race on the same missing key, only one execution of the
//! computation runs, and each caller receives its result. Failures are fanned
//! out the same way, via the clonable [`CacheError`] type, and nothing is
//! cached on failure, so the cache is left exactly as it was and callers can
//! retry.
//!
//! ## Eviction
//!
//! Eviction is strict least-recently-used. Recency is a strictly increasing
//! sequence number bumped on every read and write, which makes the eviction
//! order fully deterministic: among live entries, the one with the smallest
//! recency goes first, and insertion order doubles as the tie-break.
//!
//! The cache never retries, never expires entries by time, and has no
//! persistence; it is a purely in-process building block, and layering such
//! policies on top is the caller's business.

mod error;
mod lru;
mod memory;

pub use error::{CacheContents, CacheError};
pub use memory::BoundedCache;
