//! Backoff schedules for reconnects and publish retries.
//!
//! The same [`RetryConfig`] drives both the stream reconnect loop and the
//! per-message publish retries; each caller owns one [`Backoff`] holding the
//! attempt counter.
//!
//! Delay formulas (attempt is 1-based):
//! - linear: min(max_delay, base_delay * attempt)
//! - exponential: min(max_delay, base_delay * 2^(attempt - 1))
//!
//! Optional jitter adds ±25% to the capped delay and is clamped back to the
//! cap. Within one sequence [`Backoff`] never hands out a shorter delay than
//! the one before it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between consecutive attempts.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// base, 2*base, 3*base, ...
    #[default]
    Linear,
    /// base, 2*base, 4*base, ...
    Exponential,
}

/// Configuration for backoff retry behavior.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay cap, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of retries after the first failure (0 = unbounded)
    #[serde(default)]
    pub max_retries: u32,

    /// Growth strategy
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Whether to add ±25% jitter to delays
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_reconnect()
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            max_retries,
            strategy: BackoffStrategy::Linear,
            jitter: false,
        }
    }

    /// Stream reconnects: 5s, 10s, 15s, ... up to one minute, forever.
    pub fn for_reconnect() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: 0,
            strategy: BackoffStrategy::Linear,
            jitter: false,
        }
    }

    /// Publish retries: 200ms doubling up to 10s, five attempts.
    pub fn for_publish() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            max_retries: 5,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
        }
    }

    /// Use a different growth strategy.
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable jitter.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Base delay as a duration.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap as a duration.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Calculate the backoff delay for a given 1-based attempt.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.base_delay_ms;
        let max_ms = self.max_delay_ms;

        let delay_ms = match self.strategy {
            BackoffStrategy::Linear => base_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                base_ms.saturating_mul(1u64 << (attempt - 1).min(20))
            }
        };
        let capped_delay_ms = delay_ms.min(max_ms);

        let final_delay_ms = if self.jitter {
            let jitter_range = capped_delay_ms / 4;
            let jitter = (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range * 2 + 1);
            (capped_delay_ms.saturating_sub(jitter_range) + jitter).min(max_ms)
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_retries == 0 || attempts < self.max_retries
    }
}

/// Attempt counter for one retry sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    /// Start a fresh sequence.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    ///
    /// Never shorter than the previous delay and never above the cap.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self
            .config
            .calculate_delay(self.attempt)
            .max(self.last)
            .min(self.config.max_delay());
        self.last = delay;
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Whether the retry budget still allows another attempt.
    pub fn should_retry(&self) -> bool {
        self.config.allows(self.attempt)
    }
}

fn default_base_delay_ms() -> u64 {
    5_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
