//! Aggregates computed over a selection.

use crate::id::ItemId;
use crate::item::BulkAction;
use serde::{Deserialize, Serialize};

/// Eligible/ineligible counts of the selected items for one action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionStats {
    pub action: Option<BulkAction>,
    /// Selected ids that were present in the evaluated items.
    pub total: usize,
    pub eligible: usize,
    pub ineligible: usize,
}

/// Result of re-validating a selection right before a bulk action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkValidation {
    pub eligible: Vec<ItemId>,
    /// Ineligible ids with the rule's explanation.
    pub ineligible: Vec<(ItemId, String)>,
    /// Selected ids that no longer resolve to a cached item.
    pub stale: Vec<ItemId>,
}

impl BulkValidation {
    #[must_use]
    pub fn can_proceed(&self) -> bool {
        !self.eligible.is_empty()
    }
}
