//! Reconnect delay policy.
//!
//! The delay for attempt `n` is `min(max, base * factor^n)`, optionally scaled
//! by a uniform random value in `[0, 1)`.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Exponential backoff generator with an internal attempt counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    /// Create a generator at attempt 0.
    #[must_use]
    pub fn new(base: Duration, max: Duration, factor: f64, jitter: bool) -> Self {
        Self {
            base,
            max,
            factor,
            jitter,
            attempt: 0,
        }
    }

    /// Build a generator from configuration.
    #[must_use]
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
            config.factor,
            config.jitter,
        )
    }

    /// Return the delay before the next retry and advance the attempt counter.
    pub fn next(&mut self) -> Duration {
        let ceiling = self.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter {
            ceiling.mul_f64(rand::random::<f64>())
        } else {
            ceiling
        }
    }

    /// Return to attempt 0.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the given attempt, capped at the maximum.
    fn ceiling(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }

        let exponent = attempt.min(i32::MAX as u32) as i32;
        let nanos = self.base.as_nanos() as f64 * self.factor.powi(exponent);

        // powi overflows to infinity long before the attempt counter wraps
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            self.max
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
