use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use sift_core::Clock;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Duration>,
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker.
///
/// Opens after `threshold` consecutive failures. Once `timeout` has passed
/// since the last failure, one trial call is let through; its success
/// closes the breaker and its failure re-opens it with a fresh timer.
pub struct CircuitBreaker {
    inner: RefCell<BreakerInner>,
    threshold: u32,
    timeout: Duration,
    clock: Rc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("inner", &self.inner.borrow())
            .field("threshold", &self.threshold)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, timeout: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            inner: RefCell::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            }),
            threshold: threshold.max(1),
            timeout,
            clock,
        }
    }

    /// Current state. An open breaker whose timeout has passed reports
    /// half-open even before the trial is taken.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.borrow();
        match inner.state {
            BreakerState::Open if self.remaining(&inner).is_zero() => BreakerState::HalfOpen,
            state => state,
        }
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.borrow().failure_count
    }

    /// Whether a call would currently be refused, without claiming the
    /// half-open trial.
    pub fn check(&self) -> Result<(), Duration> {
        let inner = self.inner.borrow();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let remaining = self.remaining(&inner);
                if remaining.is_zero() {
                    Ok(())
                } else {
                    Err(remaining)
                }
            }
            BreakerState::HalfOpen if inner.trial_in_flight => Err(Duration::ZERO),
            BreakerState::HalfOpen => Ok(()),
        }
    }

    /// Ask to run a call. `Err` carries how long to wait before asking again.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let remaining = self.remaining(&inner);
                if !remaining.is_zero() {
                    return Err(remaining);
                }
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                info!("circuit breaker half-open, allowing trial call");
                Ok(())
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    // Another trial is running; its outcome decides.
                    Err(Duration::ZERO)
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != BreakerState::Closed {
            info!("circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.borrow_mut();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);
        inner.trial_in_flight = false;
        match inner.state {
            BreakerState::Closed if inner.failure_count >= self.threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    failures = inner.failure_count,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                warn!("circuit breaker trial failed, re-opened");
            }
            _ => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;
    }

    fn remaining(&self, inner: &BreakerInner) -> Duration {
        let since = inner
            .last_failure_at
            .map_or(self.timeout, |at| self.clock.now().saturating_sub(at));
        self.timeout.saturating_sub(since)
    }
}
