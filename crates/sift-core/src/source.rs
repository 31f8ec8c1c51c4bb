//! Seams to the remote backend.
//!
//! The list engine consumes a paginated [`DataSource`] and a [`BulkApi`].
//! Both are single-threaded (`?Send`) because the engine runs on a
//! cooperative, current-thread executor.

use crate::error::SourceError;
use crate::id::ItemId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sort direction requested from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Field filters, ordered so cache keys built from them are stable.
pub type Filters = BTreeMap<String, String>;

/// Arguments of a single page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageQuery {
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub filters: Filters,
}

/// One page of results plus the total item count under the current query.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
}

/// Paginated item source. Must be idempotent for identical queries.
#[async_trait(?Send)]
pub trait DataSource<T> {
    async fn fetch_page(&self, query: &PageQuery) -> Result<PageResponse<T>, SourceError>;
}

/// Per-id outcome of a bulk call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub successful: Vec<ItemId>,
    pub failed: Vec<ItemId>,
}

impl BulkResult {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold in the result of re-sending `self.failed`: new successes are
    /// appended and the failure list becomes whatever still failed.
    pub fn absorb_retry(&mut self, retry: BulkResult) {
        self.successful.extend(retry.successful);
        self.failed = retry.failed;
    }
}

/// Bulk mutation endpoints.
#[async_trait(?Send)]
pub trait BulkApi {
    async fn delete_sessions(&self, ids: &[ItemId]) -> Result<BulkResult, SourceError>;
}
