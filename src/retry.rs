use backoff::backoff::Backoff;
use std::time::Duration;

/// Attempt-capped exponential waits shared by chat calls and PDF downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            multiplier: Duration::from_secs(1),
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_attempts` times without sleeping in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            multiplier: Duration::ZERO,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    /// Wait before attempt `failed + 1`, given `failed` failures so far.
    pub fn wait_after(&self, failed: u32) -> Duration {
        let exp = 2u32.saturating_pow(failed.saturating_sub(1));
        self.multiplier
            .saturating_mul(exp)
            .clamp(self.min_wait, self.max_wait.max(self.min_wait))
    }

    pub fn backoff(&self) -> AttemptBackoff {
        AttemptBackoff {
            policy: *self,
            failed: 0,
        }
    }
}

/// `Backoff` adapter for `backoff::future::retry` that gives up once the
/// attempt budget is spent.
#[derive(Debug, Clone)]
pub struct AttemptBackoff {
    policy: RetryPolicy,
    failed: u32,
}

impl Backoff for AttemptBackoff {
    fn reset(&mut self) {
        self.failed = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.failed += 1;
        if self.failed >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.wait_after(self.failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = RetryPolicy::default().backoff();
        let waits: Vec<u64> = std::iter::from_fn(|| backoff.next_backoff())
            .map(|d| d.as_secs())
            .collect();
        // Five attempts means four waits.
        assert_eq!(waits, vec![4, 4, 4, 8]);
    }

    #[test]
    fn test_waits_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.wait_after(5), Duration::from_secs(10));
        assert_eq!(policy.wait_after(9), Duration::from_secs(10));
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut backoff = RetryPolicy::immediate(2).backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::ZERO));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::ZERO));
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let mut backoff = RetryPolicy::immediate(1).backoff();
        assert_eq!(backoff.next_backoff(), None);
    }
}
