//! Default values for the realtime connection layer
//!
//! Runtime configuration (`Config`) falls back to these when a value is not
//! set in the TOML file or the environment.

// ===== CONNECTION =====

/// Timeout for a single transport handshake
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Consecutive failed attempts before the manager gives up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: usize = 10;

/// Capacity of the event channel handed to consumers
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the per-session outbound queue
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 128;

/// WebSocket close code for a normal, deliberate closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code sent when the heartbeat declares the connection dead
pub const HEARTBEAT_TIMEOUT_CLOSURE: u16 = 4000;

// ===== BACKOFF =====

/// Delay before the first reconnect attempt
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;

/// Ceiling for reconnect delays
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

// ===== HEARTBEAT =====

/// Interval between liveness pings
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15_000;

/// Silence tolerated before the connection is declared dead
/// Default: two intervals (one missed beat)
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;

// ===== DEDUP =====

/// How long a delivered message fingerprint suppresses redelivery
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 5_000;

/// Upper bound on remembered fingerprints
pub const DEFAULT_DEDUP_MAX_ENTRIES: usize = 4_096;

// ===== RATE LIMITING =====

/// Actions allowed per identity per window
pub const DEFAULT_RATE_LIMIT_MAX_ACTIONS: u32 = 15;

/// Rate-limit window length
/// Default: 4 hours
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 4 * 60 * 60;

/// Characters of an action payload kept in the history summary
pub const DEFAULT_PAYLOAD_SUMMARY_CHARS: usize = 80;
