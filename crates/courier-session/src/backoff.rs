//! Reconnect backoff.

use std::time::Duration;

use courier_core::SupervisorConfig;

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    #[must_use]
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            initial: config.initial_backoff(),
            max: config.max_backoff(),
            multiplier: config.backoff_multiplier.max(1.0),
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt - 1)`, never above `max`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if delay.is_finite() && delay < self.max.as_secs_f64() {
            Duration::from_secs_f64(delay)
        } else {
            self.max
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

/// Consecutive failed attempts since the last successful connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    /// Record a failure and return the new attempt number.
    pub const fn record_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_exponential_growth() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
    }

    #[test]
    fn test_capped_at_max() {
        let policy = policy();
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_state_monotonic_until_reset() {
        let mut retry = RetryState::default();
        assert_eq!(retry.record_failure(), 1);
        assert_eq!(retry.record_failure(), 2);
        retry.reset();
        assert_eq!(retry.attempt(), 0);
    }
}
