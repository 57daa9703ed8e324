use std::time::Duration;

/// Default smoothing weight of the newest sample
const DEFAULT_ALPHA: f64 = 0.3;

/// Exponentially smoothed transfer rate in bytes/second
#[derive(Debug, Clone)]
pub struct RateEstimator {
    alpha: f64,
    rate: Option<f64>,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl RateEstimator {
    /// `alpha` is clamped to (0, 1]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            rate: None,
        }
    }

    /// Fold one completed chunk into the estimate and return the new rate
    pub fn record(&mut self, bytes: u64, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            return self.bytes_per_second();
        }

        let sample = bytes as f64 / elapsed.as_secs_f64();
        let next = match self.rate {
            Some(rate) => self.alpha * sample + (1.0 - self.alpha) * rate,
            None => sample,
        };
        self.rate = Some(next);
        next
    }

    /// Current estimate, 0.0 before the first sample
    pub fn bytes_per_second(&self) -> f64 {
        self.rate.unwrap_or(0.0)
    }
}
