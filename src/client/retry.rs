use std::time::Duration;

/// Capped exponential backoff for failed chunks.
///
/// `delay = min(base * factor^retry_count, cap)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            factor: 2.0,
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `retry_count` earlier retries (0-based)
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(63) as i32;
        let secs = self.base.as_secs_f64() * self.factor.powi(exp);
        let capped = secs.min(self.cap.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base, Duration::from_millis(1000));
        assert_eq!(policy.cap, Duration::from_secs(30));
        assert!((policy.factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn delay_grows_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1000), Duration::from_secs(30));
    }

    #[test]
    fn zero_base_never_waits() {
        let policy = RetryPolicy {
            base: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(3), Duration::ZERO);
    }
}
