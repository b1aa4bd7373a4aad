//! Resilience primitives for the connection manager
//!
//! - Exponential backoff for reconnect scheduling
//! - Heartbeat monitoring for silently dead connections
//! - Short-window deduplication of inbound messages

pub mod backoff;
pub mod dedup;
pub mod heartbeat;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use dedup::{DedupCache, DedupConfig, Fingerprint};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatStatus};
