//! Bounded LRU memo store with optional TTL.
//!
//! # Invariants
//!
//! 1. `len() <= max_size` at all times.
//! 2. A lookup promotes its key to most-recently-used; inserting at capacity
//!    evicts the least-recently-used key first.
//! 3. With a TTL `T`, an entry read at age `>= T` is a miss: it is dropped,
//!    recomputed, and re-stamped. A stale value is never returned.

use crate::key::stable_key;
use lru::LruCache;
use serde::{Serialize, Serializer};
use sift_core::Clock;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Stamped<V> {
    value: V,
    stored_at: Duration,
}

/// Hit/miss counters for one cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
    #[serde(serialize_with = "round_rate")]
    pub hit_rate: f64,
}

fn round_rate<S: Serializer>(rate: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((rate * 1_000.0).round() / 1_000.0)
}

/// A named, bounded, optionally expiring cache.
pub struct MemoCache<V> {
    name: String,
    store: RefCell<LruCache<String, Stamped<V>>>,
    ttl: Option<Duration>,
    clock: Rc<dyn Clock>,
    hits: Cell<u64>,
    misses: Cell<u64>,
    evictions: Cell<u64>,
}

impl<V> fmt::Debug for MemoCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("name", &self.name)
            .field("len", &self.store.borrow().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<V: Clone> MemoCache<V> {
    /// Create a cache holding at most `max_size` entries (minimum 1).
    pub fn new(
        name: impl Into<String>,
        max_size: usize,
        ttl: Option<Duration>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            store: RefCell::new(LruCache::new(capacity)),
            ttl,
            clock,
            hits: Cell::new(0),
            misses: Cell::new(0),
            evictions: Cell::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up `key`, counting a hit or miss and promoting it on hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut store = self.store.borrow_mut();
        let lookup = store
            .get(key)
            .map(|entry| self.is_fresh(entry, now).then(|| entry.value.clone()));
        let fresh = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                store.pop(key);
                tracing::debug!(cache = %self.name, key, "memo entry expired");
                None
            }
            None => None,
        };
        drop(store);

        match fresh {
            Some(value) => {
                self.hits.set(self.hits.get() + 1);
                Some(value)
            }
            None => {
                self.misses.set(self.misses.get() + 1);
                None
            }
        }
    }

    /// Store `value` under `key`, evicting the least-recently-used entry if
    /// the cache is full.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let stamped = Stamped {
            value,
            stored_at: self.clock.now(),
        };
        let key = key.into();
        let evicted = self.store.borrow_mut().push(key.clone(), stamped);
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.set(self.evictions.get() + 1);
                tracing::trace!(cache = %self.name, evicted = %old_key, "memo lru eviction");
            }
        }
    }

    /// Return the cached value for `key`, or compute, store, and return it.
    pub fn get_or_compute(&self, key: &str, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    /// Whether `key` is cached and fresh, without promoting it or touching
    /// the counters.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.store
            .borrow()
            .peek(key)
            .is_some_and(|entry| self.is_fresh(entry, now))
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.store.borrow_mut().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.store.borrow_mut().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.store.borrow().cap().get()
    }

    /// Keys from most- to least-recently used.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.store.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.get();
        let misses = self.misses.get();
        let lookups = hits + misses;
        CacheStats {
            name: self.name.clone(),
            hits,
            misses,
            evictions: self.evictions.get(),
            size: self.len(),
            max_size: self.max_size(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    pub fn reset_stats(&self) {
        self.hits.set(0);
        self.misses.set(0);
        self.evictions.set(0);
    }

    fn is_fresh(&self, entry: &Stamped<V>, now: Duration) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_sub(entry.stored_at) < ttl,
            None => true,
        }
    }
}

/// Sizing for [`memoize`].
#[derive(Clone)]
pub struct MemoOptions {
    pub name: String,
    pub max_size: usize,
    pub ttl: Option<Duration>,
    pub clock: Rc<dyn Clock>,
}

impl MemoOptions {
    #[must_use]
    pub fn new(name: impl Into<String>, max_size: usize, clock: Rc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            max_size,
            ttl: None,
            clock,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

type KeyFn<A> = Box<dyn Fn(&A) -> Option<String>>;

/// A function wrapped with a [`MemoCache`].
pub struct Memoized<A: ?Sized, R> {
    cache: MemoCache<R>,
    key_fn: KeyFn<A>,
    func: Box<dyn Fn(&A) -> R>,
}

impl<A: ?Sized, R: Clone> Memoized<A, R> {
    /// Call through the cache.
    pub fn call(&self, args: &A) -> R {
        match (self.key_fn)(args) {
            Some(key) => self.cache.get_or_compute(&key, || (self.func)(args)),
            None => (self.func)(args),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &MemoCache<R> {
        &self.cache
    }
}

impl<A: ?Sized, R> fmt::Debug for Memoized<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized").field("cache", &self.cache).finish()
    }
}

/// Wrap `func`, keying calls by the canonical JSON of their arguments.
pub fn memoize<A, R>(func: impl Fn(&A) -> R + 'static, options: MemoOptions) -> Memoized<A, R>
where
    A: Serialize + ?Sized + 'static,
    R: Clone + 'static,
{
    Memoized {
        cache: MemoCache::new(options.name, options.max_size, options.ttl, options.clock),
        key_fn: Box::new(|args: &A| stable_key(args)),
        func: Box::new(func),
    }
}

/// Wrap `func` with a custom key generator.
pub fn memoize_with_key<A, R>(
    func: impl Fn(&A) -> R + 'static,
    options: MemoOptions,
    key_fn: impl Fn(&A) -> String + 'static,
) -> Memoized<A, R>
where
    A: ?Sized + 'static,
    R: Clone + 'static,
{
    Memoized {
        cache: MemoCache::new(options.name, options.max_size, options.ttl, options.clock),
        key_fn: Box::new(move |args: &A| Some(key_fn(args))),
        func: Box::new(func),
    }
}
