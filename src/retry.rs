//! Retry policy.
//!
//! Rather than hiding retry behavior behind a task-queue decorator, this
//! is an explicit policy value the runner's loop consults directly.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    /// Exponential backoff with full jitter: `uniform(0, base * 2^attempt)`.
    /// `attempt` is 0-based (the delay before the *first* retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let ceiling = self.base_delay.saturating_mul(factor);
        let millis = ceiling.as_millis().min(u64::MAX as u128) as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=millis))
    }
}

impl Default for RetryPolicy {
    /// At-most-3 retries, matching the job trigger's retry contract.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_ceiling() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        for attempt in 0..4 {
            let ceiling = Duration::from_millis(100) * (1u32 << attempt);
            assert!(policy.delay_for(attempt) <= ceiling);
        }
    }

    #[test]
    fn default_allows_three_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }
}
