#![forbid(unsafe_code)]

//! Test harness and reference fixtures for the Sift list engine.
//!
//! - [`fixture`]: the `Session` record, status-based eligibility rules, and
//!   deterministic session generators.
//! - [`backend`]: an in-memory backend implementing both
//!   [`DataSource`](sift_core::DataSource) and [`BulkApi`](sift_core::BulkApi),
//!   with scripted failures and call accounting.
//! - [`recorder`]: captures engine events and renders them as JSONL.

pub mod backend;
pub mod fixture;
pub mod recorder;

pub use backend::{BackendCalls, FakeBackend};
pub use fixture::{Session, SessionRules, SessionStatus, sessions, sessions_with};
pub use recorder::EventRecorder;

use std::rc::Rc;

use sift_core::{BulkApi, Clock, DataSource, EngineConfig, EngineError};
use sift_runtime::ListEngine;

/// Engine over `backend` for both reads and deletes, with [`SessionRules`].
pub fn session_engine(
    backend: &Rc<FakeBackend>,
    config: EngineConfig,
    clock: Rc<dyn Clock>,
) -> Result<ListEngine<Session>, EngineError> {
    ListEngine::builder(Rc::clone(backend) as Rc<dyn DataSource<Session>>)
        .config(config)
        .clock(clock)
        .bulk_api(Rc::clone(backend) as Rc<dyn BulkApi>)
        .rules(Rc::new(SessionRules))
        .build()
}
