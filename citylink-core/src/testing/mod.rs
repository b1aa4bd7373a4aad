//! Test doubles for the transport layer
//!
//! Compiled into the library so integration tests, benches, and downstream
//! crates can drive a [`ConnectionManager`](crate::connection::ConnectionManager)
//! without a network.

pub mod mock_transport;

pub use mock_transport::{ClientFrame, ConnectPlan, MockConnector, MockSession, MockTransport};
