//! The engine's named caches and aggregate reporting.

use crate::key::eligibility_key;
use crate::memo::{CacheStats, MemoCache};
use serde::Serialize;
use sift_core::{
    BulkAction, BulkValidation, Clock, EligibilityRules, Item, ItemId, MemoConfig, MemoSpec,
    SelectionStats,
};
use std::rc::Rc;

fn named<V: Clone>(name: &str, spec: MemoSpec, clock: &Rc<dyn Clock>) -> MemoCache<V> {
    MemoCache::new(name, spec.max_size, spec.ttl(), Rc::clone(clock))
}

/// Memory estimate across all named caches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReport {
    pub caches: Vec<CacheStats>,
    pub total_entries: usize,
    pub estimated_bytes: usize,
}

/// Eligibility, statistics, validation, and filter caches, each tuned
/// separately.
#[derive(Debug)]
pub struct MemoRegistry {
    eligibility: MemoCache<bool>,
    stats: MemoCache<SelectionStats>,
    validation: MemoCache<BulkValidation>,
    filters: MemoCache<Vec<ItemId>>,
    bytes_per_entry: usize,
}

impl MemoRegistry {
    #[must_use]
    pub fn new(config: &MemoConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            eligibility: named("eligibility", config.eligibility, &clock),
            stats: named("stats", config.stats, &clock),
            validation: named("validation", config.validation, &clock),
            filters: named("filters", config.filters, &clock),
            bytes_per_entry: config.bytes_per_entry,
        }
    }

    /// Evaluate `rules` for `item` and `action`, cached by
    /// `(id, status, action)`.
    pub fn check_eligibility<T: Item>(
        &self,
        item: &T,
        action: BulkAction,
        rules: &dyn EligibilityRules<T>,
    ) -> bool {
        let key = eligibility_key(&item.id(), item.status(), action);
        self.eligibility
            .get_or_compute(&key, || rules.permits(item, action))
    }

    #[must_use]
    pub fn eligibility(&self) -> &MemoCache<bool> {
        &self.eligibility
    }

    #[must_use]
    pub fn stats(&self) -> &MemoCache<SelectionStats> {
        &self.stats
    }

    #[must_use]
    pub fn validation(&self) -> &MemoCache<BulkValidation> {
        &self.validation
    }

    #[must_use]
    pub fn filters(&self) -> &MemoCache<Vec<ItemId>> {
        &self.filters
    }

    /// Counters for a cache by name.
    #[must_use]
    pub fn stats_for(&self, name: &str) -> Option<CacheStats> {
        match name {
            "eligibility" => Some(self.eligibility.stats()),
            "stats" => Some(self.stats.stats()),
            "validation" => Some(self.validation.stats()),
            "filters" => Some(self.filters.stats()),
            _ => None,
        }
    }

    #[must_use]
    pub fn report(&self) -> MemoryReport {
        let caches = vec![
            self.eligibility.stats(),
            self.stats.stats(),
            self.validation.stats(),
            self.filters.stats(),
        ];
        let total_entries: usize = caches.iter().map(|c| c.size).sum();
        MemoryReport {
            caches,
            total_entries,
            estimated_bytes: total_entries.saturating_mul(self.bytes_per_entry),
        }
    }

    /// Drop derived values that depend on the selection or loaded data.
    pub fn invalidate_derived(&self) {
        self.stats.clear();
        self.validation.clear();
        self.filters.clear();
    }

    pub fn clear_all(&self) {
        self.eligibility.clear();
        self.invalidate_derived();
    }
}
