//! Engine configuration.
//!
//! All sections deserialize with `#[serde(default)]`, so a JSON document
//! only needs the fields it overrides. Builder methods mirror the fields for
//! programmatic setup.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Viewport geometry for the list virtualizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Height of one row, in pixels.
    pub item_height: f64,
    /// Height of the scroll container, in pixels.
    pub container_height: f64,
    /// Extra rows rendered on each side of the visible rows.
    pub buffer_size: usize,
    /// Quiet period after the last scroll before a scroll-end notification.
    pub scroll_debounce_ms: u64,
    /// Frame budget used by the performance report.
    pub frame_budget_ms: u64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            item_height: 60.0,
            container_height: 600.0,
            buffer_size: 5,
            scroll_debounce_ms: 16,
            frame_budget_ms: 16,
        }
    }
}

/// Paging and cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub page_size: usize,
    /// Pages fetched concurrently by select-all.
    pub select_all_batch_size: usize,
    /// Page numbers shown by the page-number list.
    pub page_window: usize,
    /// Item payloads kept before distant pages are evicted.
    pub max_cached_items: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            select_all_batch_size: 5,
            page_window: 7,
            max_cached_items: 5_000,
        }
    }
}

/// Retry and circuit-breaker policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before allowing a trial call.
    pub breaker_timeout_ms: u64,
    /// Terminal failures retained for diagnostics.
    pub error_log_capacity: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
            failure_threshold: 5,
            breaker_timeout_ms: 30_000,
            error_log_capacity: 50,
        }
    }
}

impl ResilienceConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.breaker_timeout_ms)
    }
}

/// Size and lifetime of one memo cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoSpec {
    pub max_size: usize,
    /// `None` disables expiry.
    pub ttl_ms: Option<u64>,
}

impl MemoSpec {
    #[must_use]
    pub const fn new(max_size: usize, ttl_ms: u64) -> Self {
        Self {
            max_size,
            ttl_ms: Some(ttl_ms),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Tuning for the named memo caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
    pub eligibility: MemoSpec,
    pub stats: MemoSpec,
    pub validation: MemoSpec,
    pub filters: MemoSpec,
    /// Per-entry size used for the global memory estimate.
    pub bytes_per_entry: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            eligibility: MemoSpec::new(200, 60_000),
            stats: MemoSpec::new(50, 5_000),
            validation: MemoSpec::new(30, 10_000),
            filters: MemoSpec::new(20, 30_000),
            bytes_per_entry: 1_024,
        }
    }
}

/// Top-level configuration for a list engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub viewport: ViewportConfig,
    pub pagination: PaginationConfig,
    pub resilience: ResilienceConfig,
    pub memo: MemoConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let viewport = &self.viewport;
        if !(viewport.item_height.is_finite() && viewport.item_height > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "item_height must be positive, got {}",
                viewport.item_height
            )));
        }
        if !(viewport.container_height.is_finite() && viewport.container_height >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "container_height must be non-negative, got {}",
                viewport.container_height
            )));
        }
        if self.pagination.page_size == 0 {
            return Err(EngineError::InvalidConfig("page_size must be at least 1".into()));
        }
        if self.pagination.select_all_batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "select_all_batch_size must be at least 1".into(),
            ));
        }
        if self.pagination.page_window == 0 {
            return Err(EngineError::InvalidConfig("page_window must be at least 1".into()));
        }
        let memo = &self.memo;
        for (name, spec) in [
            ("eligibility", memo.eligibility),
            ("stats", memo.stats),
            ("validation", memo.validation),
            ("filters", memo.filters),
        ] {
            if spec.max_size == 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "memo cache {name} needs max_size >= 1"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.pagination.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, item_height: f64, container_height: f64, buffer_size: usize) -> Self {
        self.viewport.item_height = item_height;
        self.viewport.container_height = container_height;
        self.viewport.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    #[must_use]
    pub fn with_max_cached_items(mut self, max: usize) -> Self {
        self.pagination.max_cached_items = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tuning() {
        let config = EngineConfig::default();
        assert_eq!(config.pagination.select_all_batch_size, 5);
        assert_eq!(config.resilience.max_retries, 3);
        assert_eq!(config.resilience.failure_threshold, 5);
        assert_eq!(config.resilience.breaker_timeout(), Duration::from_secs(30));
        assert_eq!(config.memo.eligibility, MemoSpec::new(200, 60_000));
        assert_eq!(config.memo.stats, MemoSpec::new(50, 5_000));
        assert_eq!(config.memo.validation, MemoSpec::new(30, 10_000));
        assert_eq!(config.memo.filters, MemoSpec::new(20, 30_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config =
            EngineConfig::from_json_str(r#"{"pagination": {"page_size": 50}}"#).unwrap();
        assert_eq!(config.pagination.page_size, 50);
        assert_eq!(config.pagination.select_all_batch_size, 5);
        assert_eq!(config.viewport, ViewportConfig::default());
    }

    #[test]
    fn rejects_zero_item_height() {
        let err = EngineConfig::from_json_str(r#"{"viewport": {"item_height": 0}}"#).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = EngineConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, EngineError::ConfigParse(_)));
    }
}
