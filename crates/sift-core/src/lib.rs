#![forbid(unsafe_code)]

//! Core: identifiers, eligibility rules, external source traits, errors,
//! events, time, and configuration for the Sift list engine.
//!
//! # Role in Sift
//! `sift-core` is the vocabulary layer. It owns the types every other crate
//! speaks: [`ItemId`], the [`Item`] trait, the [`DataSource`]/[`BulkApi`]
//! seams to the remote backend, the [`EventBus`] the presentation layer
//! subscribes to, and [`EngineConfig`].
//!
//! # How it fits in the system
//! `sift-cache` builds memoization on top of [`Clock`]; `sift-runtime`
//! composes the virtualizer, selection tracker, pagination manager, and
//! resilience controller out of these types; `sift-harness` provides fakes
//! for the source traits.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod item;
pub mod logging;
pub mod source;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EngineConfig, MemoConfig, MemoSpec, PaginationConfig, ResilienceConfig, ViewportConfig,
};
pub use error::{EngineError, ErrorKind, SourceError};
pub use event::{EngineEvent, EventBus, EventEnvelope, Subscription};
pub use id::ItemId;
pub use item::{AllowAll, BulkAction, EligibilityRules, Item};
pub use source::{BulkApi, BulkResult, DataSource, Filters, PageQuery, PageResponse, SortOrder};
pub use stats::{BulkValidation, SelectionStats};
