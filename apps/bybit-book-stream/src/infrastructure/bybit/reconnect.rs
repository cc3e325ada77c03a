//! Reconnection Policy
//!
//! Bounded retry schedule for the stream supervisor. The default is linear
//! backoff (`base * attempt`) capped at five reconnects; exponential backoff
//! is available for deployments that prefer it.

use std::time::Duration;

use rand::Rng;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// `base * attempt`.
    Linear,
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f64,
        /// Upper bound on a single delay.
        max_delay: Duration,
    },
}

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Base delay unit.
    pub base_interval: Duration,
    /// Maximum number of reconnects after a failure. Must be at least 1.
    pub max_attempts: u32,
    /// Delay growth.
    pub strategy: BackoffStrategy,
    /// Jitter factor as a fraction in `0.0..=1.0` (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            max_attempts: 5,
            strategy: BackoffStrategy::Linear,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Linear backoff with the given base and attempt cap.
    #[must_use]
    pub const fn linear(base_interval: Duration, max_attempts: u32) -> Self {
        Self {
            base_interval,
            max_attempts,
            strategy: BackoffStrategy::Linear,
            jitter_factor: 0.0,
        }
    }

    /// Set the jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Set the backoff strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Reconnection policy.
///
/// # Example
///
/// ```rust
/// use bybit_book_stream::infrastructure::bybit::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
///
/// // Connection went live again
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Count the next attempt and return how long to wait before it.
    ///
    /// Returns `None` once the attempt cap has been reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        Some(self.apply_jitter(self.delay_for(self.attempt_count)))
    }

    /// Un-jittered delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_interval;
        match self.config.strategy {
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                #[allow(clippy::cast_precision_loss)]
                let scaled = (base.as_millis() as f64 * multiplier.powi(exponent)).round();
                let max_millis = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
                if scaled.is_finite() && scaled >= 0.0 {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let millis = scaled as u64;
                    Duration::from_millis(millis.min(max_millis))
                } else {
                    max_delay
                }
            }
        }
    }

    /// Reset the policy after the connection went live.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt cap.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_attempts
    }

    /// Scale `delay` by a random factor in `1 ± jitter_factor`, never below 1ms.
    ///
    /// A factor that is not a positive finite number leaves the delay as is.
    fn apply_jitter(&self, delay: Duration) -> Duration {
        let spread = self.config.jitter_factor;
        if !(spread.is_finite() && spread > 0.0) || delay.is_zero() {
            return delay;
        }

        let spread = spread.min(1.0);
        let scale = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay
            .mul_f64(scale.max(0.0))
            .max(Duration::from_millis(1))
    }
}
