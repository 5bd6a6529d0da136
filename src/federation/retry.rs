//! Retry policy with exponential backoff and jitter

use std::time::Duration;

use rand::Rng;

use crate::config::DeliveryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Send attempts before a job is abandoned
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random, in `[0, 1]`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_secs_f64(config.initial_backoff_secs),
            max_delay: Duration::from_secs_f64(config.max_backoff_secs),
            multiplier: config.backoff_multiplier,
            jitter: config.jitter_ratio,
        }
    }

    /// Un-jittered delay after failed attempt `attempt` (1-indexed).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if !delay_secs.is_finite() || delay_secs > max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Delay after failed attempt `attempt`, with uniform jitter applied.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        if self.jitter <= 0.0 || base == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base * (1.0 + factor)).max(0.0))
    }

    /// Whether another attempt may follow `attempts_made` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
