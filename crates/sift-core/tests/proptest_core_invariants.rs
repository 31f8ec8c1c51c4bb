//! Property-based invariant tests for the core vocabulary:
//!
//! 1. Only 5xx, 408 and network-class failures are retryable.
//! 2. Integer and string forms of an id normalize to the same `ItemId`.
//! 3. A valid config survives a JSON round trip unchanged.
//! 4. A zero page size never validates.

use proptest::prelude::*;
use sift_core::{EngineConfig, ErrorKind, ItemId, SourceError};

proptest! {
    #[test]
    fn retryable_statuses_are_server_side_or_timeouts(status in 100u16..=599) {
        let retryable = ErrorKind::from_status(status).is_retryable();
        prop_assert_eq!(retryable, status >= 500 || status == 408);
    }

    #[test]
    fn network_errors_always_retry(message in "[a-z ]{0,24}") {
        let err = SourceError::network(message);
        prop_assert!(err.is_retryable());
        prop_assert!(err.is_network());
    }

    #[test]
    fn ids_normalize_across_representations(n in any::<u64>()) {
        prop_assert_eq!(ItemId::from(n), ItemId::from(n.to_string()));
        let id = ItemId::from(n);
        prop_assert_eq!(id.as_str(), n.to_string());
    }

    #[test]
    fn config_round_trips_through_json(
        page_size in 1usize..=500,
        batch in 1usize..=16,
        max_retries in 0u32..=10,
        max_cached in 1usize..=100_000,
    ) {
        let mut config = EngineConfig::default()
            .with_page_size(page_size)
            .with_max_cached_items(max_cached);
        config.pagination.select_all_batch_size = batch;
        config.resilience.max_retries = max_retries;

        let json = serde_json::to_string(&config).unwrap();
        let parsed = EngineConfig::from_json_str(&json).unwrap();
        prop_assert_eq!(parsed, config);
    }

    #[test]
    fn zero_page_size_is_rejected(batch in 1usize..=16) {
        let mut config = EngineConfig::default();
        config.pagination.page_size = 0;
        config.pagination.select_all_batch_size = batch;
        prop_assert!(config.validate().is_err());
    }
}
