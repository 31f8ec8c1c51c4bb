use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use sift_core::{BulkAction, EngineError, ErrorKind, ItemId, SourceError};

/// Shown when the breaker rejects a call.
pub const CIRCUIT_OPEN_MESSAGE: &str = "Service temporarily unavailable. Please try again shortly.";

/// What was being attempted when an error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorContext {
    BulkDelete { ids: Vec<ItemId> },
    SelectionUpdate { ids: Vec<ItemId> },
    StatsCalculation { action: BulkAction },
    ApiCall { endpoint: String },
}

impl ErrorContext {
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::BulkDelete { .. } => ContextKind::BulkDelete,
            Self::SelectionUpdate { .. } => ContextKind::SelectionUpdate,
            Self::StatsCalculation { .. } => ContextKind::StatsCalculation,
            Self::ApiCall { .. } => ContextKind::ApiCall,
        }
    }

    pub fn api_call(endpoint: impl Into<String>) -> Self {
        Self::ApiCall {
            endpoint: endpoint.into(),
        }
    }
}

/// Payload-free context tag. Parses from the wire names
/// (`BULK_DELETE`, `SELECTION_UPDATE`, `STATS_CALCULATION`, `API_CALL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextKind {
    BulkDelete,
    SelectionUpdate,
    StatsCalculation,
    ApiCall,
}

impl ContextKind {
    pub const ALL: [Self; 4] = [
        Self::BulkDelete,
        Self::SelectionUpdate,
        Self::StatsCalculation,
        Self::ApiCall,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BulkDelete => "BULK_DELETE",
            Self::SelectionUpdate => "SELECTION_UPDATE",
            Self::StatsCalculation => "STATS_CALCULATION",
            Self::ApiCall => "API_CALL",
        }
    }

    /// Fixed user-facing message for a terminal failure.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::BulkDelete => "Some sessions could not be deleted. Please try again.",
            Self::SelectionUpdate => "Your selection could not be updated. The list was refreshed.",
            Self::StatsCalculation => "Selection details are temporarily unavailable.",
            Self::ApiCall => "Could not reach the server. Check your connection and try again.",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| EngineError::UnknownContext(s.to_string()))
    }
}

/// Recovery applied once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    /// Drop the selection and reload the current page.
    ClearAndRefresh,
    /// Re-attempt each failed id on its own.
    PartialRetry,
    /// Continue with degraded, locally computed results.
    FallbackMode,
}

/// Pick the recovery strategy for a context and its final error.
///
/// Network errors never get one: the connection is the problem, not the
/// request.
#[must_use]
pub fn select_strategy(kind: ContextKind, error: &SourceError) -> Option<RecoveryStrategy> {
    if error.is_network() {
        return None;
    }
    match kind {
        ContextKind::BulkDelete => Some(RecoveryStrategy::PartialRetry),
        ContextKind::SelectionUpdate => Some(RecoveryStrategy::ClearAndRefresh),
        ContextKind::StatsCalculation => Some(RecoveryStrategy::FallbackMode),
        ContextKind::ApiCall => {
            matches!(error.kind, ErrorKind::Server(_)).then_some(RecoveryStrategy::FallbackMode)
        }
    }
}

/// Side effects the controller needs from the rest of the engine.
#[async_trait(?Send)]
pub trait RecoveryHooks {
    /// Clear the selection and reload the current page.
    async fn clear_and_refresh(&self) -> Result<(), EngineError>;

    /// Called when the controller switches to degraded results for `kind`.
    fn enter_fallback_mode(&self, kind: ContextKind) {
        let _ = kind;
    }
}
