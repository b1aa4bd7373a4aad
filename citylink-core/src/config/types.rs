use super::constants::*;
use crate::risk::WindowMode;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoint and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// `ws://` or `wss://` URL
    pub endpoint: String,

    /// Timeout for one handshake (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Reconnect budget after a loss
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: usize,

    /// Ignore `max_reconnect_attempts` and retry forever
    #[serde(default)]
    pub unlimited_reconnects: bool,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

/// Reconnect delay schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSection {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    /// Random spread applied to each delay (0.0 = deterministic)
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_BACKOFF_INITIAL_MS,
            max_delay_ms: DEFAULT_BACKOFF_MAX_MS,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

/// Liveness monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Must exceed `interval_ms`
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
        }
    }
}

/// Inbound duplicate suppression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_dedup_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_dedup_max_entries")]
    pub max_entries: usize,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: DEFAULT_DEDUP_WINDOW_MS,
            max_entries: DEFAULT_DEDUP_MAX_ENTRIES,
        }
    }
}

/// Per-identity action throttling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_rate_limit_max_actions")]
    pub max_actions: u32,

    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,

    /// "fixed" or "sliding"
    #[serde(default)]
    pub mode: WindowMode,

    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_actions: DEFAULT_RATE_LIMIT_MAX_ACTIONS,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            mode: WindowMode::Fixed,
            summary_chars: DEFAULT_PAYLOAD_SUMMARY_CHARS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_max_reconnect_attempts() -> usize {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_outbound_capacity() -> usize {
    DEFAULT_OUTBOUND_CAPACITY
}

fn default_backoff_initial_ms() -> u64 {
    DEFAULT_BACKOFF_INITIAL_MS
}

fn default_backoff_max_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_heartbeat_timeout_ms() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_MS
}

fn default_dedup_window_ms() -> u64 {
    DEFAULT_DEDUP_WINDOW_MS
}

fn default_dedup_max_entries() -> usize {
    DEFAULT_DEDUP_MAX_ENTRIES
}

fn default_rate_limit_max_actions() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_ACTIONS
}

fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}

fn default_summary_chars() -> usize {
    DEFAULT_PAYLOAD_SUMMARY_CHARS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
