//! Retry policy: how long a worker waits before handing a failed delivery back.

use std::time::Duration;

/// Backoff before a failed delivery is requeued.
///
/// The default redelivers immediately, which is what the broker does on a
/// plain nack. A non-zero base delay turns on exponential backoff keyed off
/// the delivery count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed delivery.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

impl RetryPolicy {
    /// Requeue without waiting.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Doubling backoff from `base_delay`, capped at 30s.
    pub fn backoff(base_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.base_delay.is_zero()
    }

    /// Delay after the `delivery_count`-th failed delivery (1-indexed):
    /// `base_delay * multiplier^(delivery_count - 1)`, capped at `max_delay`.
    ///
    /// With base=100ms, multiplier=2.0:
    /// - delivery 1: 100ms
    /// - delivery 2: 200ms
    /// - delivery 3: 400ms
    pub fn next_delay(&self, delivery_count: u32) -> Duration {
        if self.is_immediate() {
            return Duration::ZERO;
        }
        let exponent = delivery_count.saturating_sub(1).min(32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_is_immediate() {
        let policy = RetryPolicy::default();
        assert!(policy.is_immediate());
        assert_eq!(policy.next_delay(1), Duration::ZERO);
        assert_eq!(policy.next_delay(10), Duration::ZERO);
    }

    #[rstest]
    #[case(0, 100)]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(3, 400)]
    fn backoff_doubles(#[case] delivery_count: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::backoff(Duration::from_millis(100));
        assert_eq!(
            policy.next_delay(delivery_count),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::backoff(Duration::from_secs(1));
        assert_eq!(policy.next_delay(20), Duration::from_secs(30));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(30));
    }
}
