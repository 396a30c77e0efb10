//! Iteration and retry budgets for the driver loop.

use std::time::Duration;

/// Whether another oracle consultation fits in the iteration budget.
///
/// `consumed` is the number of iterations already started.
pub fn has_iteration_left(consumed: u32, max_iterations: u32) -> bool {
    consumed < max_iterations
}

/// Bounded exponential backoff for oracle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped at
    /// `max_delay`. A provider hint wins when it is longer, still capped.
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        let backoff = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        match hint {
            Some(hint) if hint > backoff => hint.min(self.max_delay),
            _ => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_budget_is_exclusive_upper_bound() {
        assert!(has_iteration_left(0, 1));
        assert!(!has_iteration_left(1, 1));
        assert!(!has_iteration_left(0, 0));
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        let delays: Vec<u128> = (0..5).map(|r| policy.delay(r, None).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.delay(40, None), Duration::from_millis(500));
    }

    #[test]
    fn longer_hint_wins_but_is_capped() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(
            policy.delay(0, Some(Duration::from_millis(300))),
            Duration::from_millis(300)
        );
        assert_eq!(
            policy.delay(0, Some(Duration::from_millis(50))),
            Duration::from_millis(100)
        );
        assert_eq!(policy.delay(0, Some(Duration::from_secs(60))), Duration::from_secs(1));
    }
}
