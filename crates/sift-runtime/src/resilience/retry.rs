use std::time::Duration;

use sift_core::ResilienceConfig;

/// Delay before the n-th retry.
pub trait BackoffPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

/// `base * 2^(attempt - 1)`, capped at `max`. Attempt 0 waits nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            base: config.base_delay(),
            max: config.max_delay(),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let backoff = ExponentialBackoff::default();
        let delays: Vec<u64> = (0..6)
            .map(|n| backoff.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![0, 1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let backoff = ExponentialBackoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        };
        assert_eq!(backoff.delay_for_attempt(200), Duration::from_secs(60));
    }
}
