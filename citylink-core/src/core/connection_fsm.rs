//! Connection State Machine
//!
//! Tracks the lifecycle of one logical stream and rejects transitions the
//! lifecycle does not allow.
//!
//! # State Diagram
//!
//! ```text
//!        IDLE
//!          │
//!      connect()
//!          ▼
//!     CONNECTING ──────fail──────┐
//!          │                     │
//!       success                  │
//!          ▼                     ▼
//!        OPEN ──disconnect()─→ CLOSING ──→ CLOSED ◄── unexpected close
//!          │                                 │  ▲
//!          └──────── transport lost ─────────┘  │
//!                                               │
//!                    backoff elapsed: CLOSED → CONNECTING
//!                    retries exhausted: CLOSED → FAILED
//!                    manual connect(): FAILED → CONNECTING
//! ```
//!
//! **Key Features:**
//! - `Closed` re-enters `Connecting` automatically unless the close was user-initiated
//! - `Failed` is terminal until the caller explicitly connects again
//! - `reconnect_attempts` resets to 0 whenever the connection reaches `Open`
//!
//! # Usage
//!
//! ```
//! use citylink_core::core::connection_fsm::*;
//!
//! let mut conn = ConnectionData::new("ws://localhost:8080/stream".to_string());
//! conn.transition(ConnectionState::Connecting).unwrap();
//! conn.transition(ConnectionState::Open).unwrap();
//! assert!(conn.state().is_operational());
//!
//! // Open → Connecting is never allowed directly
//! assert!(conn.transition(ConnectionState::Connecting).is_err());
//! ```

use super::errors::LinkError;
use std::fmt;
use std::time::SystemTime;

// ============================================================================
// States
// ============================================================================

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never connected
    Idle,
    /// Transport handshake in progress
    Connecting,
    /// Transport open; sends are accepted
    Open,
    /// Normal closure in progress
    Closing,
    /// No transport; a reconnect may be pending
    Closed,
    /// Gave up after max reconnection attempts
    Failed,
}

impl ConnectionState {
    /// Check if operational (sends accepted)
    pub fn is_operational(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check if a connection is underway or established
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }

    /// Check if failed
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed)
    }

    /// Get state name
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
            ConnectionState::Failed => "Failed",
        }
    }

    /// Whether `self → next` is a legal lifecycle transition
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Open)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
                | (Closed, Connecting)
                | (Closed, Failed)
                | (Failed, Connecting)
                | (Failed, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ============================================================================
// Connection Data
// ============================================================================

/// Connection record: current state plus lifecycle bookkeeping
#[derive(Debug, Clone)]
pub struct ConnectionData {
    /// Endpoint address (opaque to the state machine)
    pub endpoint: String,
    state: ConnectionState,
    /// Consecutive failed attempts since the last successful open
    pub reconnect_attempts: u32,
    /// Last liveness acknowledgment received
    pub last_heartbeat_at: Option<SystemTime>,
    /// Set by `disconnect()`; suppresses automatic reconnection
    pub user_initiated_close: bool,
    /// Timestamp when connection object was created
    pub created_at: SystemTime,
    /// Timestamp when last opened
    pub last_connected_at: Option<SystemTime>,
    /// Timestamp when last closed
    pub last_disconnected_at: Option<SystemTime>,
    /// Total number of closes after being open
    pub disconnect_count: u64,
    /// Total number of connection attempts over the lifetime
    pub total_attempts: u64,
}

impl ConnectionData {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            state: ConnectionState::Idle,
            reconnect_attempts: 0,
            last_heartbeat_at: None,
            user_initiated_close: false,
            created_at: SystemTime::now(),
            last_connected_at: None,
            last_disconnected_at: None,
            disconnect_count: 0,
            total_attempts: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply a transition, updating bookkeeping
    ///
    /// Returns `InvalidTransition` (and leaves the record untouched) when the
    /// lifecycle does not allow `self.state → next`.
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), LinkError> {
        if !self.state.can_transition_to(next) {
            return Err(LinkError::InvalidTransition {
                from: self.state.state_name(),
                to: next.state_name(),
            });
        }

        let now = SystemTime::now();
        match next {
            ConnectionState::Connecting => {
                self.total_attempts += 1;
            }
            ConnectionState::Open => {
                self.reconnect_attempts = 0;
                self.last_connected_at = Some(now);
                self.last_heartbeat_at = Some(now);
            }
            ConnectionState::Closed => {
                if matches!(self.state, ConnectionState::Open | ConnectionState::Closing) {
                    self.disconnect_count += 1;
                    self.last_disconnected_at = Some(now);
                }
            }
            _ => {}
        }

        self.state = next;
        Ok(())
    }

    /// Record a failed attempt (the backoff counter owned by the manager)
    pub fn record_failed_attempt(&mut self) {
        self.reconnect_attempts += 1;
    }

    /// Record a liveness acknowledgment
    pub fn mark_heartbeat(&mut self) {
        self.last_heartbeat_at = Some(SystemTime::now());
    }
}
