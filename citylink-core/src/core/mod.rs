//! Core types for the realtime connection layer
//!
//! - `errors`: the crate-wide [`LinkError`]
//! - `connection_fsm`: lifecycle state machine for one logical stream
//! - `frame`: liveness/data envelope parsing
//! - `events`: typed events and the callback adapter

pub mod connection_fsm;
pub mod errors;
pub mod events;
pub mod frame;

pub use connection_fsm::{ConnectionData, ConnectionState};
pub use errors::{LinkError, Result};
pub use events::{DisconnectReason, EventHandlers, LinkEvent};
pub use frame::{now_ms, DataFrame, Frame, LivenessFrame};
