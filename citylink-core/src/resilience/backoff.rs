//! Exponential backoff for reconnection
//!
//! The delay for attempt `n` is a pure function of the configuration:
//! `min(initial_delay * multiplier^n, max_delay)`. With a 1s base and a 30s
//! ceiling the sequence is `1s, 2s, 4s, 8s, 16s, 30s, 30s, ...`.
//!
//! Optional jitter spreads simultaneous reconnects from many clients; it is
//! off by default so the sequence is exact.

use crate::config::constants::{
    DEFAULT_BACKOFF_INITIAL_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
use crate::core::LinkError;
use rand::Rng;
use std::time::Duration;

/// Configuration for exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each retry (typically 2.0)
    pub multiplier: f64,
    /// Maximum number of consecutive retry attempts (None = unlimited)
    pub max_retries: Option<usize>,
    /// Randomization applied to each delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            max_delay: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            multiplier: 2.0,
            max_retries: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Create a configuration for aggressive retries (for testing)
    pub fn aggressive() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_retries: Some(5),
            jitter_factor: 0.0,
        }
    }

    /// Create a configuration for conservative retries
    pub fn conservative() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: Some(20),
            jitter_factor: 0.2, // 20% jitter
        }
    }

    /// Create a configuration with unlimited retries
    pub fn unlimited() -> Self {
        Self {
            max_retries: None,
            ..Default::default()
        }
    }

    /// Delay for a zero-based attempt number, without jitter
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }

        Duration::from_nanos(nanos as u64)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.initial_delay.is_zero() {
            return Err(LinkError::InvalidConfig(
                "backoff initial_delay must be positive".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(LinkError::InvalidConfig(format!(
                "backoff max_delay ({:?}) must be >= initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        if !(self.multiplier >= 1.0) {
            return Err(LinkError::InvalidConfig(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(LinkError::InvalidConfig(format!(
                "backoff jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Exponential backoff state machine
///
/// Owns the attempt counter; the delays themselves come from
/// [`BackoffConfig::delay_for`].
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_attempt: usize,
}

impl ExponentialBackoff {
    /// Create a new backoff with default configuration
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    /// Create a new backoff with custom configuration
    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            config,
            current_attempt: 0,
        }
    }

    /// Get the next delay duration and advance the attempt counter
    ///
    /// Returns None if max retries exceeded
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }

        let delay = self.with_jitter(self.config.delay_for(self.current_attempt));
        self.current_attempt += 1;

        Some(delay)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor == 0.0 {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen::<f64>() * self.config.jitter_factor;
        let jitter_multiplier = 1.0 + (jitter - self.config.jitter_factor / 2.0);

        Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier).min(self.config.max_delay)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Get current attempt number
    pub fn attempt_number(&self) -> usize {
        self.current_attempt
    }

    /// Check if more retries are available
    pub fn can_retry(&self) -> bool {
        match self.config.max_retries {
            Some(max) => self.current_attempt < max,
            None => true,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
