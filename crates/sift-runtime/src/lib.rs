#![forbid(unsafe_code)]

//! Runtime: the list management engine proper.
//!
//! # Components
//!
//! - [`virtualized`]: scroll offset + items → visible/buffered slice, click
//!   translation, render-cost metrics.
//! - [`selection`]: the selected-id set, range anchors, and eligibility stats.
//! - [`pagination`]: page loads, per-page and per-item caches, quiet loads,
//!   select-all across pages.
//! - [`resilience`]: backoff retry, circuit breaker, recovery strategies.
//! - [`error_log`]: bounded ring of recent terminal failures.
//! - [`engine`]: [`ListEngine`], which wires the above together.
//!
//! # Execution model
//!
//! Everything runs on one thread. State lives behind `RefCell`s owned by a
//! single component; no borrow is held across an `.await` or while event
//! subscribers run.

pub mod engine;
pub mod error_log;
pub mod pagination;
pub mod resilience;
pub mod selection;
pub mod virtualized;

pub use engine::{BulkActionReport, EngineBuilder, ListEngine};
pub use error_log::ErrorLog;
pub use pagination::{LoadOptions, PageInfo, PaginationManager, SelectAllReport};
pub use resilience::{
    BreakerState, BulkOutcome, CircuitBreaker, ContextKind, ErrorContext, ErrorRecord,
    FailureEntry, FailureReport, RecoveryHooks, RecoveryOutcome, RecoveryStrategy,
    ResilienceController,
};
pub use selection::SelectionTracker;
pub use virtualized::{
    ClickModifiers, ClickOutcome, ListVirtualizer, PerformanceReport, VisibleSlice,
};
