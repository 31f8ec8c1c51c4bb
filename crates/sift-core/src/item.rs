//! The item contract and eligibility rules.
//!
//! The engine never looks inside a record beyond its id and status. Whether
//! an item may take part in a bulk action is decided by an injected
//! [`EligibilityRules`] implementation.

use crate::id::ItemId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A record the engine can list, select, and act on.
pub trait Item: Clone {
    /// Stable identifier.
    fn id(&self) -> ItemId;

    /// Backend status string (e.g. `"processing"`, `"done"`).
    fn status(&self) -> &str;
}

/// Bulk operations a selection can be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Select,
    Delete,
    Export,
}

impl BulkAction {
    /// Stable lowercase name, used in cache keys and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Delete => "delete",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "select" => Ok(Self::Select),
            "delete" => Ok(Self::Delete),
            "export" => Ok(Self::Export),
            other => Err(format!("unknown bulk action: {other}")),
        }
    }
}

/// Eligibility predicates supplied by the application.
///
/// Every predicate defaults to `true`, matching a rules object that simply
/// omits a check.
pub trait EligibilityRules<T> {
    fn can_select(&self, _item: &T) -> bool {
        true
    }

    fn can_delete(&self, _item: &T) -> bool {
        true
    }

    fn can_export(&self, _item: &T) -> bool {
        true
    }

    /// Human-readable reason an item is ineligible, if any.
    fn ineligible_reason(&self, _item: &T, _action: BulkAction) -> Option<String> {
        None
    }

    /// Dispatch to the predicate for `action`.
    fn permits(&self, item: &T, action: BulkAction) -> bool {
        match action {
            BulkAction::Select => self.can_select(item),
            BulkAction::Delete => self.can_delete(item),
            BulkAction::Export => self.can_export(item),
        }
    }
}

/// Rules that allow every action on every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl<T> EligibilityRules<T> for AllowAll {}
