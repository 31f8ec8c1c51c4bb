#![forbid(unsafe_code)]

//! In-memory backend with scripted failures.
//!
//! [`FakeBackend`] serves pages from a `Vec<Session>`, honouring the
//! `status` filter and sorting by `created_at` or `title`. Failures are
//! queued per endpoint and consumed one call at a time, so a test can say
//! "the next two fetches time out" and then watch the engine recover.

use async_trait::async_trait;
use rustc_hash::FxHashSet;
use serde::Serialize;
use sift_core::{
    BulkApi, BulkResult, DataSource, ItemId, PageQuery, PageResponse, SortOrder, SourceError,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

use crate::fixture::Session;

/// Call accounting for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendCalls {
    pub fetches: u32,
    /// Page numbers in the order they were requested.
    pub pages: Vec<usize>,
    /// Most fetches ever outstanding at once.
    pub peak_in_flight: u32,
    pub delete_calls: u32,
    /// Ids sent to each delete call.
    pub delete_batches: Vec<Vec<String>>,
}

/// Shared in-memory backend.
#[derive(Default)]
pub struct FakeBackend {
    sessions: RefCell<Vec<Session>>,
    fetch_failures: RefCell<VecDeque<SourceError>>,
    delete_failures: RefCell<VecDeque<SourceError>>,
    /// Ids the delete endpoint reports as failed while still queued.
    stuck: RefCell<FxHashSet<String>>,
    /// Number of delete calls a stuck id keeps failing for.
    stuck_calls: Cell<u32>,
    latency: Cell<Duration>,
    in_flight: Cell<u32>,
    calls: RefCell<BackendCalls>,
}

impl FakeBackend {
    #[must_use]
    pub fn new(sessions: Vec<Session>) -> Rc<Self> {
        Rc::new(Self {
            sessions: RefCell::new(sessions),
            ..Self::default()
        })
    }

    /// Fail the next fetches, one queued error per call.
    pub fn fail_fetches(&self, errors: impl IntoIterator<Item = SourceError>) {
        self.fetch_failures.borrow_mut().extend(errors);
    }

    /// Fail the next delete calls as a whole, one queued error per call.
    pub fn fail_deletes(&self, errors: impl IntoIterator<Item = SourceError>) {
        self.delete_failures.borrow_mut().extend(errors);
    }

    /// Report `ids` as failed for the next `calls` delete calls that include them.
    pub fn stick<S: Into<String>>(&self, ids: impl IntoIterator<Item = S>, calls: u32) {
        self.stuck.borrow_mut().extend(ids.into_iter().map(Into::into));
        self.stuck_calls.set(calls);
    }

    /// Delay every fetch by `latency` of tokio time.
    pub fn set_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }

    /// Replace the stored sessions.
    pub fn replace(&self, sessions: Vec<Session>) {
        *self.sessions.borrow_mut() = sessions;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.borrow().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.borrow().iter().any(|s| s.id == id)
    }

    #[must_use]
    pub fn calls(&self) -> BackendCalls {
        self.calls.borrow().clone()
    }

    pub fn reset_calls(&self) {
        *self.calls.borrow_mut() = BackendCalls::default();
    }

    fn matching(&self, query: &PageQuery) -> Vec<Session> {
        let mut rows: Vec<Session> = self
            .sessions
            .borrow()
            .iter()
            .filter(|s| {
                query
                    .filters
                    .get("status")
                    .is_none_or(|wanted| s.status.as_str() == wanted)
            })
            .cloned()
            .collect();
        match query.sort_by.as_deref() {
            Some("title") => rows.sort_by(|a, b| a.title.cmp(&b.title)),
            Some("created_at") => rows.sort_by_key(|s| s.created_at),
            _ => {}
        }
        if query.sort_by.is_some() && query.sort_order == SortOrder::Desc {
            rows.reverse();
        }
        rows
    }
}

#[async_trait(?Send)]
impl DataSource<Session> for FakeBackend {
    async fn fetch_page(&self, query: &PageQuery) -> Result<PageResponse<Session>, SourceError> {
        {
            let mut calls = self.calls.borrow_mut();
            calls.fetches += 1;
            calls.pages.push(query.page);
            let in_flight = self.in_flight.get() + 1;
            self.in_flight.set(in_flight);
            calls.peak_in_flight = calls.peak_in_flight.max(in_flight);
        }
        let latency = self.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.set(self.in_flight.get() - 1);
        let failure = self.fetch_failures.borrow_mut().pop_front();
        if let Some(error) = failure {
            trace!(page = query.page, %error, "scripted fetch failure");
            return Err(error);
        }

        let rows = self.matching(query);
        let total = rows.len();
        let start = query.page.saturating_sub(1).saturating_mul(query.page_size);
        let data = rows.into_iter().skip(start).take(query.page_size).collect();
        Ok(PageResponse { data, total })
    }
}

#[async_trait(?Send)]
impl BulkApi for FakeBackend {
    async fn delete_sessions(&self, ids: &[ItemId]) -> Result<BulkResult, SourceError> {
        {
            let mut calls = self.calls.borrow_mut();
            calls.delete_calls += 1;
            calls
                .delete_batches
                .push(ids.iter().map(|id| id.as_str().to_string()).collect());
        }
        let failure = self.delete_failures.borrow_mut().pop_front();
        if let Some(error) = failure {
            trace!(%error, "scripted delete failure");
            return Err(error);
        }

        let mut result = BulkResult::default();
        let stuck_round = self.stuck_calls.get() > 0;
        let mut hit_stuck = false;
        for id in ids {
            if stuck_round && self.stuck.borrow().contains(id.as_str()) {
                hit_stuck = true;
                result.failed.push(id.clone());
                continue;
            }
            let mut sessions = self.sessions.borrow_mut();
            let before = sessions.len();
            sessions.retain(|s| s.id != id.as_str());
            if sessions.len() < before {
                result.successful.push(id.clone());
            } else {
                result.failed.push(id.clone());
            }
        }
        if hit_stuck {
            self.stuck_calls.set(self.stuck_calls.get() - 1);
        }
        Ok(result)
    }
}
