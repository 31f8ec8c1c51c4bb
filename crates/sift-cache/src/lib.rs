#![forbid(unsafe_code)]

//! Memoization for repeated eligibility and statistics computations.
//!
//! - [`MemoCache`]: bounded LRU store with optional TTL and hit/miss counters.
//! - [`memoize`] / [`Memoized`]: wrap a function so repeated calls with
//!   equal keys reuse the cached result.
//! - [`MemoRegistry`]: the four named caches the engine uses (eligibility,
//!   stats, validation, filters) plus aggregate reporting.
//!
//! Only derived values are cached. The selection set itself never is, so a
//! false hit from a compact key can at worst produce a stale statistic.

pub mod key;
pub mod memo;
pub mod registry;

pub use key::{eligibility_key, snapshot_key, stable_key, summary_key, SUMMARY_ID_SAMPLE};
pub use memo::{memoize, memoize_with_key, CacheStats, MemoCache, MemoOptions, Memoized};
pub use registry::{MemoRegistry, MemoryReport};
