//! Retry backoff policy: exponential with a cap, plus jitter.

use std::time::Duration;

use rand::RngExt;

use jobhub_core::config::queue::RetryConfig;

/// Computes the delay before a retried job becomes eligible again.
///
/// The nominal delay doubles with every attempt (`base * 2^(attempt-1)`)
/// up to the configured cap; a symmetric jitter is applied on top so
/// that a burst of failures does not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_ms: u64,
    cap_ms: u64,
    jitter_ratio: f64,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms.max(1),
            cap_ms: config.max_delay_ms.max(config.base_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// The pre-jitter delay for execution attempt `attempt` (1-based).
    ///
    /// Monotonically non-decreasing in the attempt number up to the cap.
    pub fn nominal_delay(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 32) as u32;
        let factor = 1u64 << exponent;
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }

    /// The jittered delay for execution attempt `attempt` (1-based).
    pub fn delay(&self, attempt: i32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let factor = 1.0 + self.jitter_ratio * rand::rng().random_range(-1.0..=1.0);
        Duration::from_millis((nominal * factor).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, cap_ms: u64, jitter: f64) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            base_delay_ms: base_ms,
            max_delay_ms: cap_ms,
            jitter_ratio: jitter,
        })
    }

    #[test]
    fn nominal_delay_doubles_then_caps() {
        let policy = policy(1_000, 300_000, 0.0);
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(4_000));
        assert_eq!(policy.nominal_delay(9), Duration::from_millis(256_000));
        assert_eq!(policy.nominal_delay(10), Duration::from_millis(300_000));
        assert_eq!(policy.nominal_delay(11), Duration::from_millis(300_000));
    }

    #[test]
    fn nominal_delay_is_monotonically_non_decreasing() {
        let policy = policy(500, 60_000, 0.0);
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = policy.nominal_delay(attempt);
            assert!(delay >= previous, "delay regressed at attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = policy(10_000, 300_000, 0.2);
        for attempt in 1..=5 {
            let nominal = policy.nominal_delay(attempt).as_millis() as f64;
            for _ in 0..100 {
                let jittered = policy.delay(attempt).as_millis() as f64;
                assert!(jittered >= nominal * 0.8 - 1.0);
                assert!(jittered <= nominal * 1.2 + 1.0);
            }
        }
    }

    #[test]
    fn extreme_attempt_numbers_do_not_overflow() {
        let policy = policy(1_000, u64::MAX, 0.0);
        assert_eq!(
            policy.nominal_delay(i32::MAX),
            Duration::from_millis(1_000u64 << 32)
        );
    }
}
