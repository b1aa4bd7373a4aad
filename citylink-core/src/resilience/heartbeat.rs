//! Heartbeat Monitor
//!
//! Detects a connection that is open at the transport level but silently
//! dead. The monitor does not own a timer: the connection driver ticks it on
//! every `interval` and feeds it every liveness acknowledgment.
//!
//! A connection is declared dead when `now - last_seen > timeout`. Because
//! `timeout > interval`, one missed beat is tolerated.

use crate::config::constants::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_HEARTBEAT_TIMEOUT_MS};
use crate::core::LinkError;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for heartbeat monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between liveness pings
    pub interval: Duration,
    /// Maximum silence before the connection is declared dead
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
        }
    }
}

impl HeartbeatConfig {
    /// Create a validated configuration
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, LinkError> {
        let config = Self { interval, timeout };
        config.validate()?;
        Ok(config)
    }

    /// `timeout` must exceed `interval`, and `interval` must be positive
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.interval.is_zero() {
            return Err(LinkError::InvalidConfig(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.timeout <= self.interval {
            return Err(LinkError::InvalidConfig(format!(
                "heartbeat timeout ({:?}) must be greater than interval ({:?})",
                self.timeout, self.interval
            )));
        }
        Ok(())
    }
}

/// Result of a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// Acknowledgment seen recently enough; send the next ping
    Alive,
    /// No acknowledgment within the timeout
    Expired {
        /// Silence observed at the tick
        elapsed: Duration,
    },
}

/// Tracks time since the last liveness acknowledgment
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_seen: Instant,
    pings_sent: u64,
    acks_received: u64,
}

impl HeartbeatMonitor {
    /// Start monitoring; `started_at` counts as the first liveness signal
    pub fn new(config: HeartbeatConfig, started_at: Instant) -> Self {
        Self {
            config,
            last_seen: started_at,
            pings_sent: 0,
            acks_received: 0,
        }
    }

    /// Record an inbound liveness acknowledgment
    #[inline]
    pub fn mark_alive(&mut self, now: Instant) {
        self.acks_received += 1;
        // Out-of-order timestamps never move last_seen backwards
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// Record an outbound ping
    #[inline]
    pub fn mark_ping_sent(&mut self) {
        self.pings_sent += 1;
    }

    /// Evaluate liveness at an interval tick
    pub fn tick(&self, now: Instant) -> HeartbeatStatus {
        let elapsed = now.saturating_duration_since(self.last_seen);
        if elapsed > self.config.timeout {
            HeartbeatStatus::Expired { elapsed }
        } else {
            HeartbeatStatus::Alive
        }
    }

    /// Check if the connection has gone silent
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.tick(now), HeartbeatStatus::Expired { .. })
    }

    /// Time of the last acknowledgment
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time since the last acknowledgment
    pub fn time_since_ack(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    pub fn acks_received(&self) -> u64 {
        self.acks_received
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }
}
