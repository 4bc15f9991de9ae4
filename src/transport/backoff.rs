//! Reconnection with exponential backoff

use std::time::Duration;

/// Bounded exponential backoff for automatic reconnects
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`. Once `max_attempts`
/// retries have been scheduled no further delay is produced until
/// [`ReconnectPolicy::reset`] is called after a successful open.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` when the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        self.attempts += 1;
        Some(delay_for_attempt(self.base_delay, self.attempts))
    }

    /// Retries scheduled since the last reset
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another retry may be scheduled
    #[must_use]
    pub const fn has_budget(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Restore the full budget
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Delay for a 1-based attempt number
#[must_use]
pub fn delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    base.saturating_mul(2u32.saturating_pow(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let mut policy = ReconnectPolicy::new(4, Duration::from_millis(500));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(4000)));
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn no_attempt_beyond_budget() {
        let mut policy = ReconnectPolicy::new(3, Duration::from_millis(100));
        let scheduled = std::iter::from_fn(|| policy.next_delay()).count();
        assert_eq!(scheduled, 3);
        assert!(!policy.has_budget());
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut policy = ReconnectPolicy::new(0, Duration::from_millis(100));
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reset_restores_budget() {
        let mut policy = ReconnectPolicy::new(1, Duration::from_millis(100));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn huge_attempt_saturates() {
        let delay = delay_for_attempt(Duration::from_secs(1), 200);
        assert!(delay >= Duration::from_secs(1));
    }
}
