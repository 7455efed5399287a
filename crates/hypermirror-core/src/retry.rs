//! Retry schedule for the guarded client.
//!
//! Delays grow linearly (`base * attempt`). Upstream rate budgets were sized
//! against this schedule, so it is not exponential.

use std::time::Duration;

/// Configuration for the automatic retry mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay unit multiplied by the attempt number.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn linear(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay to wait after the failed `attempt` (1-based) before the next one.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt that just failed, starting at 1
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_three_attempts_one_second_base() {
        let config = RetryConfig::default();

        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.delay_after_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_after_attempt(2), Duration::from_secs(2));
    }

    #[test]
    fn delays_grow_linearly_not_exponentially() {
        let config = RetryConfig::linear(5, Duration::from_millis(250));

        let delays: Vec<_> = (1..5).map(|a| config.delay_after_attempt(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(750),
                Duration::from_millis(1_000),
            ]
        );
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryConfig::linear(0, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryConfig::no_retry().max_attempts(), 1);
    }
}
