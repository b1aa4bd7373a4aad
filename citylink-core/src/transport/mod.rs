//! Transport abstraction
//!
//! The connection manager drives any [`Connector`]; production code uses
//! [`WsConnector`] (tokio-tungstenite), tests use
//! [`MockConnector`](crate::testing::MockConnector).

pub mod websocket;

pub use websocket::{WsConnector, WsTransport};

use crate::core::Result;
use std::future::Future;

/// One inbound item from an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text frame
    Text(String),
    /// Transport-level pong (counts as a liveness acknowledgment)
    Pong,
    /// Peer closed the connection
    Closed { code: Option<u16>, reason: String },
}

/// An open, bidirectional message transport
///
/// At most one is open per connection manager at any time.
pub trait Transport: Send + 'static {
    /// Send one text frame
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next inbound item; `None` when the stream ended
    ///
    /// Must be cancel-safe: the driver polls it inside `tokio::select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Inbound>>> + Send;

    /// Close with the given code
    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports to an endpoint
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self, endpoint: &str) -> impl Future<Output = Result<Self::Transport>> + Send;
}
