//! Error taxonomy.
//!
//! [`SourceError`] is what the backend seams return; its [`ErrorKind`]
//! decides whether the resilience layer may retry. [`EngineError`] is what
//! engine operations surface to their callers.

use std::time::Duration;
use thiserror::Error;

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused, reset, DNS, offline.
    Network,
    Timeout,
    /// 5xx-class backend error.
    Server(u16),
    /// 400-class "bad request".
    BadRequest,
    NotFound,
    AlreadyExists,
    /// Request rejected by domain validation.
    Validation,
    Other,
}

impl ErrorKind {
    /// Transient failures are worth retrying; the rest are terminal.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server(_))
    }

    /// Map an HTTP status code to a kind.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::BadRequest,
            404 => Self::NotFound,
            409 => Self::AlreadyExists,
            408 | 504 => Self::Timeout,
            500..=599 => Self::Server(status),
            _ => Self::Other,
        }
    }
}

/// A failure reported by a [`DataSource`](crate::DataSource) or
/// [`BulkApi`](crate::BulkApi).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct SourceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status), message)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self.kind, ErrorKind::Network | ErrorKind::Timeout)
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a page load is already in flight (requested page {page})")]
    LoadInProgress { page: usize },

    #[error("page {page} is out of range (1..={total_pages})")]
    PageOutOfRange { page: usize, total_pages: usize },

    #[error("load of page {page} was superseded by a cache invalidation")]
    Superseded { page: usize },

    #[error("circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("unknown error context: {0}")]
    UnknownContext(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl EngineError {
    /// The originating backend error, if this wraps one.
    #[must_use]
    pub fn source_error(&self) -> Option<&SourceError> {
        match self {
            Self::Source(err) => Some(err),
            _ => None,
        }
    }
}
