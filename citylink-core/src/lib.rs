//! CityLink Core - Resilient realtime connection layer
//!
//! Keeps a live streaming connection to a backend over an unreliable
//! network: detects silently dead connections, reconnects automatically,
//! suppresses duplicate deliveries, and throttles an end user's outbound
//! actions.
//!
//! ## Architecture
//! - **One driver task per connection**: all transport, heartbeat, and
//!   backoff state lives in a single tokio task
//! - **Typed events** over a bounded channel, with an optional callback adapter
//! - **At-most-once sends**: messages are dropped, never queued, while not open
//! - **Injected services**: the rate limiter is an explicit, cloneable handle
//!
//! ## Core Modules
//! - `core`: lifecycle state machine, frames, events, errors
//! - `connection`: the [`ConnectionManager`]
//! - `resilience`: backoff, heartbeat monitor, dedup cache
//! - `risk`: per-identity [`RateLimiter`]
//! - `transport`: transport traits and the WebSocket implementation
//! - `config`: layered TOML/environment configuration
//! - `monitoring`: Prometheus metrics
//!
//! ## Usage
//!
//! ```no_run
//! use citylink_core::prelude::*;
//!
//! # async fn run() -> citylink_core::Result<()> {
//! let config = LinkConfig::new("wss://realtime.example.org/stream");
//! let (mut link, events) = ConnectionManager::new(config, WsConnector::new())?;
//!
//! let handlers = EventHandlers::new()
//!     .on_message(|frame| println!("{}", frame.payload))
//!     .on_disconnected(|reason| eprintln!("disconnected: {}", reason));
//! tokio::spawn(async move { handlers.pump(events).await });
//!
//! link.connect();
//! link.send(r#"{"type":"subscribe","channel":"metrics"}"#);
//! link.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod monitoring;
pub mod resilience;
pub mod risk;
pub mod testing;
pub mod transport;
pub mod utils;

pub use connection::{ConnectionManager, LinkConfig, SendOutcome};
pub use core::{ConnectionState, LinkError, LinkEvent, Result};
pub use risk::RateLimiter;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::connection::{ConnectionManager, LinkConfig, SendOutcome};
    pub use crate::core::{
        ConnectionState, DataFrame, DisconnectReason, EventHandlers, LinkError, LinkEvent,
    };
    pub use crate::resilience::{BackoffConfig, DedupConfig, HeartbeatConfig};
    pub use crate::risk::{RateLimitConfig, RateLimitStatus, RateLimiter, WindowMode};
    pub use crate::transport::{Connector, Transport, WsConnector};
    pub use crate::Result;
}
