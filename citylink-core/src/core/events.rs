//! Events published by the connection manager
//!
//! The manager publishes [`LinkEvent`]s on a bounded channel. Consumers that
//! prefer callbacks can wrap the receiver with [`EventHandlers::pump`]:
//!
//! ```no_run
//! use citylink_core::core::EventHandlers;
//! # async fn example(rx: tokio::sync::mpsc::Receiver<citylink_core::core::LinkEvent>) {
//! let handlers = EventHandlers::new()
//!     .on_connected(|| println!("connected"))
//!     .on_message(|data| println!("{}", data.payload))
//!     .on_disconnected(|reason| println!("disconnected: {}", reason))
//!     .on_error(|err| eprintln!("error: {}", err));
//!
//! handlers.pump(rx).await;
//! # }
//! ```
//!
//! Callbacks run on the pumping task and must not block.

use super::errors::LinkError;
use super::frame::DataFrame;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Why a connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description
    pub message: String,
    /// WebSocket close code, if one was received or sent
    pub code: Option<u16>,
    /// Whether a reconnect will be scheduled
    pub will_reconnect: bool,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>, code: Option<u16>, will_reconnect: bool) -> Self {
        Self {
            message: message.into(),
            code,
            will_reconnect,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Typed lifecycle and data events
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Transport opened
    Connected,
    /// Transport closed
    Disconnected(DisconnectReason),
    /// A reconnect is scheduled after `delay`
    Reconnecting { attempt: usize, delay: Duration },
    /// Deduplicated inbound data frame
    Message(DataFrame),
    /// Non-fatal or terminal error; see [`LinkError::is_recoverable`]
    Error(LinkError),
}

type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;
type DisconnectedCallback = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&DataFrame) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&LinkError) + Send + Sync>;
type ReconnectingCallback = Arc<dyn Fn(usize, Duration) + Send + Sync>;

/// Callback adapter over the event channel
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_connected: Option<ConnectedCallback>,
    on_disconnected: Option<DisconnectedCallback>,
    on_reconnecting: Option<ReconnectingCallback>,
    on_message: Option<MessageCallback>,
    on_error: Option<ErrorCallback>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    pub fn on_disconnected(
        mut self,
        f: impl Fn(&DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    pub fn on_reconnecting(mut self, f: impl Fn(usize, Duration) + Send + Sync + 'static) -> Self {
        self.on_reconnecting = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&DataFrame) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&LinkError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Invoke the matching callback for one event
    pub fn dispatch(&self, event: &LinkEvent) {
        match event {
            LinkEvent::Connected => {
                if let Some(f) = &self.on_connected {
                    f();
                }
            }
            LinkEvent::Disconnected(reason) => {
                if let Some(f) = &self.on_disconnected {
                    f(reason);
                }
            }
            LinkEvent::Reconnecting { attempt, delay } => {
                if let Some(f) = &self.on_reconnecting {
                    f(*attempt, *delay);
                }
            }
            LinkEvent::Message(data) => {
                if let Some(f) = &self.on_message {
                    f(data);
                }
            }
            LinkEvent::Error(err) => {
                if let Some(f) = &self.on_error {
                    f(err);
                }
            }
        }
    }

    /// Drain the receiver until the manager drops its sender
    pub async fn pump(&self, mut rx: mpsc::Receiver<LinkEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(&event);
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_reconnecting", &self.on_reconnecting.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_disconnect_reason_display() {
        let reason = DisconnectReason::new("heartbeat timeout", Some(4000), true);
        assert_eq!(reason.to_string(), "heartbeat timeout (code: 4000)");

        let reason = DisconnectReason::new("stream ended", None, true);
        assert_eq!(reason.to_string(), "stream ended");
    }

    #[test]
    fn test_dispatch_routes_to_matching_callback() {
        let connected = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let c = connected.clone();
        let e = errors.clone();
        let handlers = EventHandlers::new()
            .on_connected(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            });

        handlers.dispatch(&LinkEvent::Connected);
        handlers.dispatch(&LinkEvent::Error(LinkError::malformed("bad")));
        handlers.dispatch(&LinkEvent::Connected);
        // No message callback registered: ignored
        handlers.dispatch(&LinkEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1),
        });

        assert_eq!(connected.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pump_drains_until_sender_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handlers = EventHandlers::new().on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = mpsc::channel(8);
        tx.send(LinkEvent::Connected).await.unwrap();
        tx.send(LinkEvent::Connected).await.unwrap();
        drop(tx);

        handlers.pump(rx).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
