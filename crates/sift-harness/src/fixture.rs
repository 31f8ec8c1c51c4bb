#![forbid(unsafe_code)]

//! Deterministic session fixtures.

use serde::{Deserialize, Serialize};
use sift_core::{BulkAction, EligibilityRules, Item, ItemId};
use std::fmt;

/// Processing state of an extraction session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extraction session as the list displays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub status: SessionStatus,
    /// Seconds since the fixture epoch.
    pub created_at: u64,
}

impl Item for Session {
    fn id(&self) -> ItemId {
        ItemId::new(self.id.as_str())
    }

    fn status(&self) -> &str {
        self.status.as_str()
    }
}

/// `count` sessions `s-000`, `s-001`, ... with statuses cycling through
/// completed, completed, failed, processing.
#[must_use]
pub fn sessions(count: usize) -> Vec<Session> {
    sessions_with(count, |i| match i % 4 {
        2 => SessionStatus::Failed,
        3 => SessionStatus::Processing,
        _ => SessionStatus::Completed,
    })
}

/// `count` sessions whose status is chosen by `status_of(index)`.
pub fn sessions_with(count: usize, status_of: impl Fn(usize) -> SessionStatus) -> Vec<Session> {
    (0..count)
        .map(|i| Session {
            id: format!("s-{i:03}"),
            title: format!("Statement {i}"),
            status: status_of(i),
            created_at: 1_000 + i as u64 * 60,
        })
        .collect()
}

/// Eligibility by status: sessions still processing cannot be deleted and
/// only completed sessions can be exported.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionRules;

impl EligibilityRules<Session> for SessionRules {
    fn can_delete(&self, item: &Session) -> bool {
        item.status != SessionStatus::Processing
    }

    fn can_export(&self, item: &Session) -> bool {
        item.status == SessionStatus::Completed
    }

    fn ineligible_reason(&self, item: &Session, action: BulkAction) -> Option<String> {
        match action {
            BulkAction::Delete if item.status == SessionStatus::Processing => {
                Some("cannot delete while processing".to_string())
            }
            BulkAction::Export if item.status != SessionStatus::Completed => {
                Some(format!("cannot export a {} session", item.status))
            }
            _ => None,
        }
    }
}
