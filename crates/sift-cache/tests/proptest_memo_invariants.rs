//! Property-based invariant tests for the memo cache:
//!
//! 1. Size never exceeds `max_size`.
//! 2. Inserting `max_size + k` distinct keys evicts exactly the first `k`.
//! 3. A read promotes a key so it outlives later insertions.
//! 4. Values read before the TTL are cached; at or after it they are recomputed.

use proptest::prelude::*;
use sift_cache::MemoCache;
use sift_core::{Clock, ManualClock};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

fn cache(max: usize, ttl: Option<Duration>) -> (MemoCache<usize>, ManualClock) {
    let clock = ManualClock::new();
    let shared: Rc<dyn Clock> = Rc::new(clock.clone());
    (MemoCache::new("prop", max, ttl, shared), clock)
}

proptest! {
    #[test]
    fn size_is_bounded(max in 1usize..=32, keys in proptest::collection::vec(0u16..200, 0..300)) {
        let (cache, _) = cache(max, None);
        for k in keys {
            cache.insert(k.to_string(), usize::from(k));
            prop_assert!(cache.len() <= max);
        }
    }

    #[test]
    fn overflow_evicts_oldest_first(max in 1usize..=24, extra in 0usize..=24) {
        let (cache, _) = cache(max, None);
        for i in 0..max + extra {
            cache.insert(i.to_string(), i);
        }
        prop_assert_eq!(cache.len(), max);
        for i in 0..extra {
            prop_assert!(!cache.contains(&i.to_string()));
        }
        for i in extra..max + extra {
            prop_assert!(cache.contains(&i.to_string()));
        }
    }

    #[test]
    fn read_promotes_past_later_inserts(max in 2usize..=16) {
        let (cache, _) = cache(max, None);
        for i in 0..max {
            cache.insert(i.to_string(), i);
        }
        prop_assert_eq!(cache.get("0"), Some(0));
        cache.insert("new".to_string(), 999);
        prop_assert!(cache.contains("0"));
        prop_assert!(!cache.contains("1"));
    }

    #[test]
    fn ttl_expiry_boundary(ttl_ms in 1u64..=120_000, probe_ms in 0u64..=240_000) {
        let (cache, clock) = cache(4, Some(Duration::from_millis(ttl_ms)));
        let computed = Cell::new(0usize);
        let compute = || {
            computed.set(computed.get() + 1);
            computed.get()
        };

        cache.get_or_compute("k", compute);
        clock.advance(Duration::from_millis(probe_ms));
        let value = cache.get_or_compute("k", compute);

        if probe_ms < ttl_ms {
            prop_assert_eq!(value, 1);
            prop_assert_eq!(computed.get(), 1);
        } else {
            prop_assert_eq!(value, 2);
            prop_assert_eq!(computed.get(), 2);
        }
    }
}
