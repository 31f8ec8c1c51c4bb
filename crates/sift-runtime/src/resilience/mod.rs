#![forbid(unsafe_code)]

//! Retry, circuit breaking, and recovery for backend calls.
//!
//! [`ResilienceController`] is the only place retry policy lives. Callers
//! hand it a fallible operation plus an [`ErrorContext`]; it retries
//! transient failures with exponential backoff, stops early when the
//! [`CircuitBreaker`] is open, and once retries are exhausted applies a
//! [`RecoveryStrategy`] chosen from the context and the final error.
//!
//! Each failure in progress has an [`ErrorRecord`], created on the first
//! failure, updated per attempt, and removed on success or terminal failure.
//! Terminal failures land in a bounded [`ErrorLog`].

mod breaker;
mod recovery;
mod retry;

pub use breaker::{BreakerState, CircuitBreaker};
pub use recovery::{
    CIRCUIT_OPEN_MESSAGE, ContextKind, ErrorContext, RecoveryHooks, RecoveryStrategy,
    select_strategy,
};
pub use retry::{BackoffPolicy, ExponentialBackoff};

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use sift_core::{
    BulkApi, BulkResult, Clock, EngineError, ErrorKind, ItemId, ResilienceConfig, SourceError,
};
use tracing::{debug, error, info, warn};

use crate::error_log::ErrorLog;

/// A failure still being worked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub id: u64,
    pub error: SourceError,
    pub context: ErrorContext,
    /// Calls made so far, including the first.
    pub attempts: u32,
    pub retryable: bool,
}

/// A terminal failure kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub record: ErrorRecord,
    pub strategy: Option<RecoveryStrategy>,
    pub message: &'static str,
    pub at: Duration,
}

/// Why an operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub error: SourceError,
    pub context: ContextKind,
    pub attempts: u32,
    pub retryable: bool,
    pub strategy: Option<RecoveryStrategy>,
    /// Fixed per-context text safe to show a user.
    pub message: &'static str,
}

/// Result of running an operation under the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome<R> {
    Recovered { value: R, attempts: u32 },
    Failed(FailureReport),
    CircuitOpen {
        retry_after: Duration,
        message: &'static str,
    },
}

impl<R> RecoveryOutcome<R> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }

    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Collapse into a plain result for callers that only need the value.
    pub fn into_result(self) -> Result<R, EngineError> {
        match self {
            Self::Recovered { value, .. } => Ok(value),
            Self::Failed(report) => Err(EngineError::Source(report.error)),
            Self::CircuitOpen { retry_after, .. } => Err(EngineError::CircuitOpen { retry_after }),
        }
    }
}

/// Result of [`ResilienceController::bulk_delete`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkOutcome {
    pub result: BulkResult,
    /// Backend calls made, including per-id retries.
    pub attempts: u32,
    pub strategy: Option<RecoveryStrategy>,
    /// User-facing message when anything is left failed.
    pub message: Option<&'static str>,
    pub circuit_open: bool,
}

/// Final state of a failed `handle_error` run.
struct Failure {
    record: u64,
    kind: ContextKind,
    error: SourceError,
    attempts: u32,
    retryable: bool,
}

/// Owner of the breaker, the active error records, and the failure log.
pub struct ResilienceController {
    config: ResilienceConfig,
    breaker: CircuitBreaker,
    backoff: Box<dyn BackoffPolicy>,
    active: RefCell<BTreeMap<u64, ErrorRecord>>,
    next_record_id: Cell<u64>,
    failures: RefCell<ErrorLog<FailureEntry>>,
    hooks: RefCell<Option<Rc<dyn RecoveryHooks>>>,
    bulk_api: Option<Rc<dyn BulkApi>>,
    fallback_mode: Cell<bool>,
    clock: Rc<dyn Clock>,
}

impl std::fmt::Debug for ResilienceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceController")
            .field("config", &self.config)
            .field("breaker", &self.breaker)
            .field("active", &self.active.borrow().len())
            .field("failures", &self.failures.borrow().len())
            .field("fallback_mode", &self.fallback_mode.get())
            .finish_non_exhaustive()
    }
}

impl ResilienceController {
    #[must_use]
    pub fn new(config: ResilienceConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                config.failure_threshold,
                config.breaker_timeout(),
                Rc::clone(&clock),
            ),
            backoff: Box::new(ExponentialBackoff::from_config(&config)),
            active: RefCell::new(BTreeMap::new()),
            next_record_id: Cell::new(1),
            failures: RefCell::new(ErrorLog::new(config.error_log_capacity)),
            hooks: RefCell::new(None),
            bulk_api: None,
            fallback_mode: Cell::new(false),
            clock,
            config,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    #[must_use]
    pub fn with_bulk_api(mut self, api: Rc<dyn BulkApi>) -> Self {
        self.bulk_api = Some(api);
        self
    }

    /// Install the engine callbacks used by recovery strategies.
    pub fn set_hooks(&self, hooks: Rc<dyn RecoveryHooks>) {
        *self.hooks.borrow_mut() = Some(hooks);
    }

    // ------------------------------------------------------------------
    // Running operations
    // ------------------------------------------------------------------

    /// Run `op` once and hand any failure to [`handle_error`](Self::handle_error).
    pub async fn run<R, F, Fut>(&self, context: ErrorContext, mut op: F) -> RecoveryOutcome<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, SourceError>>,
    {
        if let Err(retry_after) = self.breaker.try_acquire() {
            return self.circuit_open(context.kind(), retry_after);
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                RecoveryOutcome::Recovered { value, attempts: 1 }
            }
            Err(err) => {
                self.breaker.record_failure();
                let retryable = err.is_retryable();
                self.handle_error(err, context, retryable, op).await
            }
        }
    }

    /// Recover from `error`, which `op` already produced once.
    ///
    /// Retryable errors are retried up to `max_retries` times with backoff;
    /// terminal ones are reported at once without using the retry budget.
    pub async fn handle_error<R, F, Fut>(
        &self,
        error: SourceError,
        context: ErrorContext,
        retryable: bool,
        mut op: F,
    ) -> RecoveryOutcome<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, SourceError>>,
    {
        let kind = context.kind();
        let record = self.open_record(error.clone(), context, retryable);
        let mut last_error = error;
        let mut retryable = retryable;
        let mut attempts = 1;

        if let Err(retry_after) = self.breaker.check() {
            self.finish(record, None, CIRCUIT_OPEN_MESSAGE);
            return self.circuit_open(kind, retry_after);
        }

        if retryable {
            for attempt in 1..=self.config.max_retries {
                let delay = self.backoff.delay_for_attempt(attempt);
                warn!(
                    context = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure"
                );
                sleep(delay).await;

                if let Err(retry_after) = self.breaker.try_acquire() {
                    self.finish(record, None, CIRCUIT_OPEN_MESSAGE);
                    return self.circuit_open(kind, retry_after);
                }
                attempts += 1;
                match op().await {
                    Ok(value) => {
                        self.record_success();
                        self.active.borrow_mut().remove(&record);
                        info!(context = %kind, attempts, "recovered after retry");
                        return RecoveryOutcome::Recovered { value, attempts };
                    }
                    Err(err) => {
                        self.breaker.record_failure();
                        retryable = err.is_retryable();
                        self.update_record(record, err.clone(), retryable);
                        last_error = err;
                        if !retryable {
                            break;
                        }
                    }
                }
            }
        }

        let failure = Failure {
            record,
            kind,
            error: last_error,
            attempts,
            retryable,
        };
        RecoveryOutcome::Failed(self.exhausted(failure).await)
    }

    /// Delete `ids`, re-sending only the ids that failed.
    ///
    /// Whole-batch retries use the normal backoff. If ids are still failing
    /// afterwards and the error allows it, each remaining id is tried once
    /// on its own.
    pub async fn bulk_delete(&self, ids: &[ItemId]) -> Result<BulkOutcome, EngineError> {
        let api = self
            .bulk_api
            .clone()
            .ok_or_else(|| EngineError::InvalidConfig("no bulk api attached".to_string()))?;

        let mut pending: Vec<ItemId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !pending.contains(id) {
                pending.push(id.clone());
            }
        }
        let mut outcome = BulkOutcome {
            result: BulkResult {
                successful: Vec::new(),
                failed: pending,
            },
            ..BulkOutcome::default()
        };
        if outcome.result.failed.is_empty() {
            return Ok(outcome);
        }

        let mut record: Option<u64> = None;
        let mut last_error: Option<SourceError> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                sleep(self.backoff.delay_for_attempt(attempt)).await;
            }
            if self.breaker.try_acquire().is_err() {
                outcome.circuit_open = true;
                break;
            }
            outcome.attempts += 1;
            let batch = outcome.result.failed.clone();
            match api.delete_sessions(&batch).await {
                Ok(partial) => {
                    self.record_success();
                    outcome.result.absorb_retry(partial);
                    last_error = None;
                    if outcome.result.is_complete() {
                        break;
                    }
                    let err = SourceError::new(
                        ErrorKind::Other,
                        format!("{} ids failed to delete", outcome.result.failed.len()),
                    );
                    self.track_bulk_failure(&mut record, err, &outcome.result.failed, true);
                }
                Err(err) => {
                    self.breaker.record_failure();
                    let retryable = err.is_retryable();
                    self.track_bulk_failure(&mut record, err.clone(), &batch, retryable);
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
            debug!(
                attempt,
                remaining = outcome.result.failed.len(),
                "bulk delete incomplete"
            );
        }

        if !outcome.result.is_complete() && !outcome.circuit_open {
            outcome.strategy = match &last_error {
                None => Some(RecoveryStrategy::PartialRetry),
                Some(err) if err.is_retryable() => select_strategy(ContextKind::BulkDelete, err),
                Some(_) => None,
            };
            if outcome.strategy == Some(RecoveryStrategy::PartialRetry) {
                self.retry_each(api.as_ref(), &mut outcome).await;
            }
        }

        match record {
            Some(id) if outcome.result.is_complete() => {
                self.active.borrow_mut().remove(&id);
                info!(attempts = outcome.attempts, "bulk delete recovered");
            }
            Some(id) => {
                let message = if outcome.circuit_open {
                    CIRCUIT_OPEN_MESSAGE
                } else {
                    ContextKind::BulkDelete.user_message()
                };
                self.finish(id, outcome.strategy, message);
                outcome.message = Some(message);
            }
            None if outcome.circuit_open => outcome.message = Some(CIRCUIT_OPEN_MESSAGE),
            None => {}
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Failures currently being retried.
    #[must_use]
    pub fn active_error_count(&self) -> usize {
        self.active.borrow().len()
    }

    /// Up to `n` most recent terminal failures, newest first.
    #[must_use]
    pub fn recent_failures(&self, n: usize) -> Vec<FailureEntry> {
        self.failures.borrow().recent(n).cloned().collect()
    }

    /// Terminal failures ever logged, including evicted ones.
    #[must_use]
    pub fn total_failures(&self) -> usize {
        self.failures.borrow().total_count()
    }

    #[must_use]
    pub fn is_fallback_mode(&self) -> bool {
        self.fallback_mode.get()
    }

    pub fn exit_fallback_mode(&self) {
        if self.fallback_mode.replace(false) {
            info!("leaving fallback mode");
        }
    }

    #[must_use]
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Close the breaker and forget all records and logged failures.
    pub fn reset(&self) {
        self.breaker.reset();
        self.active.borrow_mut().clear();
        self.failures.borrow_mut().reset();
        self.fallback_mode.set(false);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// A call went through: close the breaker and leave fallback mode.
    fn record_success(&self) {
        self.breaker.record_success();
        self.exit_fallback_mode();
    }

    fn open_record(&self, error: SourceError, context: ErrorContext, retryable: bool) -> u64 {
        let id = self.next_record_id.get();
        self.next_record_id.set(id + 1);
        debug!(record = id, context = %context.kind(), error = %error, retryable, "error recorded");
        self.active.borrow_mut().insert(
            id,
            ErrorRecord {
                id,
                error,
                context,
                attempts: 1,
                retryable,
            },
        );
        id
    }

    fn update_record(&self, id: u64, error: SourceError, retryable: bool) {
        if let Some(record) = self.active.borrow_mut().get_mut(&id) {
            record.error = error;
            record.retryable = retryable;
            record.attempts += 1;
        }
    }

    fn track_bulk_failure(
        &self,
        record: &mut Option<u64>,
        error: SourceError,
        ids: &[ItemId],
        retryable: bool,
    ) {
        match *record {
            Some(id) => self.update_record(id, error, retryable),
            None => {
                let context = ErrorContext::BulkDelete { ids: ids.to_vec() };
                *record = Some(self.open_record(error, context, retryable));
            }
        }
    }

    /// Retries are used up: apply the recovery strategy and log the failure.
    async fn exhausted(&self, failure: Failure) -> FailureReport {
        let Failure {
            record,
            kind,
            error,
            attempts,
            retryable,
        } = failure;
        let strategy = if retryable {
            select_strategy(kind, &error)
        } else {
            None
        };
        self.apply(strategy, kind).await;

        let message = kind.user_message();
        self.finish(record, strategy, message);
        FailureReport {
            error,
            context: kind,
            attempts,
            retryable,
            strategy,
            message,
        }
    }

    async fn apply(&self, strategy: Option<RecoveryStrategy>, kind: ContextKind) {
        let hooks = self.hooks.borrow().clone();
        match strategy {
            Some(RecoveryStrategy::ClearAndRefresh) => {
                info!(context = %kind, "recovering with clear and refresh");
                if let Some(hooks) = hooks {
                    if let Err(err) = hooks.clear_and_refresh().await {
                        warn!(context = %kind, error = %err, "clear and refresh failed");
                    }
                }
            }
            Some(RecoveryStrategy::FallbackMode) => {
                if !self.fallback_mode.replace(true) {
                    warn!(context = %kind, "entering fallback mode");
                }
                if let Some(hooks) = hooks {
                    hooks.enter_fallback_mode(kind);
                }
            }
            // Needs per-id knowledge of the operation; see `bulk_delete`.
            Some(RecoveryStrategy::PartialRetry) | None => {}
        }
    }

    async fn retry_each(&self, api: &dyn BulkApi, outcome: &mut BulkOutcome) {
        let mut still_failed = Vec::new();
        for id in std::mem::take(&mut outcome.result.failed) {
            if self.breaker.try_acquire().is_err() {
                outcome.circuit_open = true;
                still_failed.push(id);
                continue;
            }
            outcome.attempts += 1;
            match api.delete_sessions(std::slice::from_ref(&id)).await {
                Ok(single) => {
                    self.record_success();
                    if single.successful.contains(&id) {
                        outcome.result.successful.push(id);
                    } else {
                        still_failed.push(id);
                    }
                }
                Err(err) => {
                    self.breaker.record_failure();
                    debug!(id = %id, error = %err, "per-id delete failed");
                    still_failed.push(id);
                }
            }
        }
        outcome.result.failed = still_failed;
    }

    /// Move a record from the active set to the failure log.
    fn finish(&self, id: u64, strategy: Option<RecoveryStrategy>, message: &'static str) {
        let Some(record) = self.active.borrow_mut().remove(&id) else {
            return;
        };
        error!(
            context = %record.context.kind(),
            attempts = record.attempts,
            error = %record.error,
            strategy = ?strategy,
            "operation failed"
        );
        self.failures.borrow_mut().push(FailureEntry {
            record,
            strategy,
            message,
            at: self.clock.now(),
        });
    }

    fn circuit_open<R>(&self, kind: ContextKind, retry_after: Duration) -> RecoveryOutcome<R> {
        debug!(context = %kind, retry_after_ms = retry_after.as_millis() as u64, "circuit open");
        RecoveryOutcome::CircuitOpen {
            retry_after,
            message: CIRCUIT_OPEN_MESSAGE,
        }
    }
}

async fn sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
