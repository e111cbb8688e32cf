//! Exponential backoff configuration with jitter.
//!
//! [`BackoffConfig`] controls how transient errors (429, 5xx, transport,
//! timeout) are retried with increasing delays. For a local model server use
//! [`BackoffConfig::none()`]; for cloud APIs use [`BackoffConfig::standard()`].

use std::time::Duration;

/// Configuration for transport-level retry with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of transport retries. Default: 2.
    pub max_retries: u32,

    /// Initial delay before the first retry. Default: 1 second.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry. Default: 2.0.
    /// Delay grows: initial, initial * multiplier, initial * multiplier^2, ...
    pub multiplier: f64,

    /// Maximum delay between retries. Default: 30 seconds.
    /// Prevents exponential blowup on sustained outages.
    pub max_delay: Duration,

    /// Jitter strategy. Default: Full.
    pub jitter: JitterStrategy,

    /// Whether to respect `Retry-After` headers from the provider.
    /// Default: `true`.
    pub respect_retry_after: bool,
}

/// Jitter strategy to prevent thundering herd on shared rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,
    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,
    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// No transport retry. For a local model server or when the caller
    /// handles errors itself.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// Defaults for cloud APIs: 2 retries, 1s initial, 2x multiplier,
    /// 30s max, full jitter, respects Retry-After.
    pub fn standard() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::Full,
            respect_retry_after: true,
        }
    }

    /// Calculate the delay for attempt N (0-indexed).
    ///
    /// The uncapped delay is `initial_delay * multiplier^attempt`; `max_delay`
    /// bounds it. Each jitter strategy is a lower bound on the fraction of
    /// that delay actually slept: the final delay is drawn uniformly from
    /// `[floor * delay, delay]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay.mul_f64(self.multiplier.powi(attempt as i32));
        if delay > self.max_delay {
            delay = self.max_delay;
        }

        let floor = match self.jitter {
            JitterStrategy::None => return delay,
            JitterStrategy::Full => 0.0,
            JitterStrategy::Equal => 0.5,
        };
        delay.mul_f64(floor + fastrand::f64() * (1.0 - floor))
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::standard()
    }
}
