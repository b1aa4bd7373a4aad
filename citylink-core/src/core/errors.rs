//! Error types for the realtime connection layer
//!
//! Every fallible operation in the crate returns [`LinkError`]. Errors that
//! reach consumers through [`LinkEvent::Error`](crate::core::LinkEvent) are
//! cloned, so all payloads are owned strings rather than source errors.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the connection manager, transports and configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The underlying transport failed (I/O error, protocol violation, refused handshake)
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport did not complete its handshake in time
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// An inbound frame could not be parsed; the frame is discarded
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// Why parsing failed
        reason: String,
    },

    /// An outbound write did not complete in time
    #[error("write stalled for {0:?}")]
    WriteTimeout(Duration),

    /// No liveness acknowledgment arrived within the heartbeat timeout
    #[error("heartbeat timed out: no acknowledgment for {elapsed:?} (timeout {timeout:?})")]
    HeartbeatTimeout {
        /// Time since the last acknowledgment
        elapsed: Duration,
        /// Configured timeout
        timeout: Duration,
    },

    /// Reconnection gave up after the configured number of consecutive failures
    #[error("gave up reconnecting after {attempts} consecutive failed attempts")]
    RetriesExhausted {
        /// Number of failed attempts
        attempts: usize,
    },

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lifecycle transition not permitted by the connection state machine
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State before the transition
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// An outbound message could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl LinkError {
    /// Whether the connection manager recovers from this error on its own
    ///
    /// Terminal errors require an explicit new `connect()` from the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            LinkError::RetriesExhausted { .. } | LinkError::InvalidConfig(_)
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        LinkError::MalformedFrame {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Serialization(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::Transport(e.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_frame_display() {
        let err = LinkError::malformed("expected JSON object");
        let msg = format!("{}", err);
        assert!(msg.contains("malformed frame"));
        assert!(msg.contains("expected JSON object"));
    }

    #[test]
    fn test_retries_exhausted_is_terminal() {
        let err = LinkError::RetriesExhausted { attempts: 10 };
        assert!(!err.is_recoverable());
        assert!(format!("{}", err).contains("10"));
    }

    #[test]
    fn test_transport_errors_are_recoverable() {
        assert!(LinkError::Transport("connection reset".to_string()).is_recoverable());
        assert!(LinkError::ConnectTimeout(Duration::from_secs(5)).is_recoverable());
        assert!(LinkError::malformed("bad").is_recoverable());
        assert!(LinkError::WriteTimeout(Duration::from_secs(3)).is_recoverable());
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: LinkError = parse_err.into();
        assert!(matches!(err, LinkError::Serialization(_)));
    }
}
