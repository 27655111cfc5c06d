//! Backoff policy for token acquisition.

use rand::Rng;
use std::time::Duration;

/// Attempt budget and backoff curve. Defaults: 3 attempts, 1 s base,
/// 10 s cap, up to 10% jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the backoff added as random jitter (0.0 disables).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^failed_attempt, max)` without jitter. `failed_attempt`
    /// is zero-based.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(failed_attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus up to `jitter_ratio` of random extra delay.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let backoff = self.backoff(failed_attempt);
        if !(self.jitter_ratio.is_finite() && self.jitter_ratio > 0.0) || backoff.is_zero() {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        backoff + backoff.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6).map(|i| policy.backoff(i).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn test_backoff_is_non_decreasing_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(5),
            jitter_ratio: 0.0,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2200));
        }
    }

    #[test]
    fn test_non_finite_jitter_adds_nothing() {
        for ratio in [f64::NAN, f64::INFINITY] {
            let policy = RetryPolicy {
                jitter_ratio: ratio,
                ..RetryPolicy::default()
            };
            assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_huge_attempt_index_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(u32::MAX), policy.max_delay);
    }
}
