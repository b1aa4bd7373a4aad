//! Resilient connection manager
//!
//! Owns a single logical connection to a realtime endpoint. A background
//! driver task opens the transport, watches liveness with the heartbeat
//! monitor, suppresses duplicate deliveries, and reconnects with
//! exponential backoff until the caller disconnects or the retry budget is
//! spent.
//!
//! ```text
//!  connect() ──► Connecting ──► Open ──(loss / heartbeat timeout)──► Closed
//!                    ▲                                                  │
//!                    └──────────────── backoff delay ◄──────────────────┤
//!                                                                       │
//!                                         retries exhausted ──► Failed ◄┘
//! ```
//!
//! Events reach the caller through the bounded channel returned by
//! [`ConnectionManager::new`]; wrap it in
//! [`EventHandlers`](crate::core::EventHandlers) for a callback interface.

mod driver;

use crate::config::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_OUTBOUND_CAPACITY,
    NORMAL_CLOSURE,
};
use crate::core::{
    ConnectionData, ConnectionState, DisconnectReason, LinkError, LinkEvent, Result,
};
use crate::monitoring::LinkMetrics;
use crate::resilience::{BackoffConfig, DedupConfig, HeartbeatConfig};
use crate::transport::Connector;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for one managed connection
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Endpoint URL, e.g. `wss://realtime.example.org/stream`
    pub endpoint: String,
    /// Timeout for a single handshake
    pub connect_timeout: Duration,
    pub heartbeat: HeartbeatConfig,
    /// Reconnect schedule; `max_retries` is the reconnect budget
    pub backoff: BackoffConfig,
    /// `None` disables duplicate suppression
    pub dedup: Option<DedupConfig>,
    /// Capacity of the event channel
    pub event_capacity: usize,
    /// Capacity of the outbound queue of an open connection
    pub outbound_capacity: usize,
}

impl LinkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            heartbeat: HeartbeatConfig::default(),
            backoff: BackoffConfig::default(),
            dedup: Some(DedupConfig::default()),
            event_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the reconnect budget (`None` retries forever)
    pub fn with_max_reconnect_attempts(mut self, attempts: Option<usize>) -> Self {
        self.backoff.max_retries = attempts;
        self
    }

    pub fn with_dedup(mut self, dedup: Option<DedupConfig>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(LinkError::InvalidConfig("endpoint must not be empty".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(LinkError::InvalidConfig(
                "connect_timeout must be positive".into(),
            ));
        }
        if self.event_capacity == 0 || self.outbound_capacity == 0 {
            return Err(LinkError::InvalidConfig(
                "channel capacities must be positive".into(),
            ));
        }
        if let Some(dedup) = &self.dedup {
            if dedup.window.is_zero() || dedup.max_entries == 0 {
                return Err(LinkError::InvalidConfig(
                    "dedup window and max_entries must be positive".into(),
                ));
            }
        }
        self.heartbeat.validate()?;
        self.backoff.validate()?;
        Ok(())
    }
}

/// State shared between the manager handle and its driver task
pub(crate) struct Shared {
    inner: Mutex<SharedInner>,
}

struct SharedInner {
    data: ConnectionData,
    /// Queue into the open transport; `Some` only while Open
    outbound: Option<mpsc::Sender<String>>,
    /// A reconnect delay is running
    reconnect_pending: bool,
}

impl Shared {
    fn new(endpoint: String) -> Self {
        Self {
            inner: Mutex::new(SharedInner {
                data: ConnectionData::new(endpoint),
                outbound: None,
                reconnect_pending: false,
            }),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().data.state()
    }

    /// Move to `next`; staying in the current state is a no-op
    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.inner.lock().move_to(next);
    }

    pub(crate) fn open(&self, outbound: mpsc::Sender<String>) {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.data.transition(ConnectionState::Open) {
            error!("Rejected state change: {}", e);
        }
        inner.outbound = Some(outbound);
    }

    pub(crate) fn clear_outbound(&self) {
        self.inner.lock().outbound = None;
    }

    pub(crate) fn mark_heartbeat(&self) {
        self.inner.lock().data.mark_heartbeat();
    }

    pub(crate) fn user_closed(&self) -> bool {
        self.inner.lock().data.user_initiated_close
    }

    /// Close out an attempt or session and apply `plan` in one step
    ///
    /// `connect()` never observes a Closed state between the close and the
    /// pending reconnect (or Failed). A user close turns any plan into
    /// [`AfterClose::Stop`]; the plan actually applied is returned.
    pub(crate) fn settle(&self, plan: AfterClose) -> AfterClose {
        let mut inner = self.inner.lock();
        let plan = if inner.data.user_initiated_close {
            AfterClose::Stop
        } else {
            plan
        };

        inner.move_to(ConnectionState::Closed);
        match plan {
            AfterClose::Retry(_) => {
                inner.data.record_failed_attempt();
                inner.reconnect_pending = true;
            }
            AfterClose::GiveUp => inner.move_to(ConnectionState::Failed),
            AfterClose::Stop => {}
        }
        plan
    }

    /// Leave the reconnect delay; with `resume` the next attempt starts
    /// under the same lock
    pub(crate) fn end_reconnect_delay(&self, resume: bool) {
        let mut inner = self.inner.lock();
        inner.reconnect_pending = false;
        if resume && !inner.data.user_initiated_close {
            inner.move_to(ConnectionState::Connecting);
        }
    }
}

impl SharedInner {
    fn move_to(&mut self, next: ConnectionState) {
        let current = self.data.state();
        if current == next {
            return;
        }
        if let Err(e) = self.data.transition(next) {
            // Only reachable through a driver bug; keep the record consistent
            error!("Rejected state change: {}", e);
        } else {
            debug!("Connection state {} -> {}", current, next);
        }
    }
}

/// What follows a closed attempt or session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterClose {
    /// Wait out the delay, then reconnect
    Retry(Duration),
    /// Retry budget spent
    GiveUp,
    /// Lifecycle over (user close or normal server close)
    Stop,
}

/// Outcome of [`ConnectionManager::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued on the open transport
    Queued,
    /// Not open; the message was dropped
    NotOpen,
    /// Outbound queue full; the message was dropped
    Backpressure,
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued)
    }
}

/// Handle to a managed realtime connection
///
/// One transport at most is open at any time. Dropping the manager aborts
/// the driver task without a close handshake; call
/// [`disconnect`](Self::disconnect) for an orderly shutdown.
pub struct ConnectionManager<C: Connector> {
    config: Arc<LinkConfig>,
    connector: Arc<C>,
    shared: Arc<Shared>,
    events: mpsc::Sender<LinkEvent>,
    metrics: Option<LinkMetrics>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create an idle manager and the receiving end of its event channel
    pub fn new(config: LinkConfig, connector: C) -> Result<(Self, mpsc::Receiver<LinkEvent>)> {
        config.validate()?;

        let (events, rx) = mpsc::channel(config.event_capacity);
        let shared = Arc::new(Shared::new(config.endpoint.clone()));

        info!(
            "Connection manager created for {} (heartbeat {:?}/{:?}, max reconnects {:?})",
            config.endpoint,
            config.heartbeat.interval,
            config.heartbeat.timeout,
            config.backoff.max_retries
        );

        Ok((
            Self {
                config: Arc::new(config),
                connector: Arc::new(connector),
                shared,
                events,
                metrics: None,
                shutdown: None,
                task: None,
            },
            rx,
        ))
    }

    /// Report into `metrics`; takes effect from the next `connect()`
    pub fn with_metrics(mut self, metrics: LinkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start the connection lifecycle
    ///
    /// Idempotent: does nothing while a connection is Connecting, Open,
    /// Closing, or waiting out a reconnect delay. From Idle, Closed, or
    /// Failed it starts a fresh lifecycle with a reset backoff.
    pub fn connect(&mut self) {
        {
            let mut inner = self.shared.inner.lock();
            let state = inner.data.state();
            if state.is_active() || state == ConnectionState::Closing || inner.reconnect_pending
            {
                debug!("connect() ignored: connection is {}", state);
                return;
            }

            inner.data.user_initiated_close = false;
            if let Err(e) = inner.data.transition(ConnectionState::Connecting) {
                error!("connect() rejected: {}", e);
                return;
            }
        }

        // A finished lifecycle may still be unwinding its last statement
        if let Some(old) = self.task.take() {
            old.abort();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let ctx = driver::DriverContext {
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
        };

        info!("Connecting to {}", self.config.endpoint);
        self.task = Some(tokio::spawn(driver::run(ctx, shutdown_rx)));
    }

    /// Queue `message` on the open transport
    ///
    /// At-most-once: when the connection is not Open (or its queue is
    /// full) the message is dropped and never resent.
    pub fn send(&self, message: impl Into<String>) -> SendOutcome {
        let outcome = {
            let inner = self.shared.inner.lock();
            match (&inner.outbound, inner.data.state()) {
                (Some(tx), ConnectionState::Open) => match tx.try_send(message.into()) {
                    Ok(()) => SendOutcome::Queued,
                    Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Backpressure,
                    Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotOpen,
                },
                _ => SendOutcome::NotOpen,
            }
        };

        match outcome {
            SendOutcome::Queued => {}
            SendOutcome::NotOpen => {
                debug!("Dropping outbound message: connection not open");
                self.count_drop("not_open");
            }
            SendOutcome::Backpressure => {
                warn!("Dropping outbound message: outbound queue full");
                self.count_drop("backpressure");
            }
        }
        outcome
    }

    /// Serialize `value` as JSON and [`send`](Self::send) it
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<SendOutcome> {
        let text = serde_json::to_string(value)?;
        Ok(self.send(text))
    }

    /// Close the connection and cancel any pending reconnect
    ///
    /// Sends a normal-closure frame when a transport is open and emits a
    /// final `Disconnected` event. When this returns the driver task has
    /// stopped and no further connection attempt will be made until the
    /// next `connect()`.
    pub async fn disconnect(&mut self) {
        self.shared.inner.lock().data.user_initiated_close = true;

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Connection driver panicked: {}", e);
                }
            }
        }

        let was = {
            let mut inner = self.shared.inner.lock();
            inner.outbound = None;
            inner.reconnect_pending = false;
            let was = inner.data.state();
            if was != ConnectionState::Closed {
                if was == ConnectionState::Open {
                    let _ = inner.data.transition(ConnectionState::Closing);
                }
                if let Err(e) = inner.data.transition(ConnectionState::Closed) {
                    error!("disconnect() could not close: {}", e);
                }
            }
            was
        };

        if matches!(was, ConnectionState::Open | ConnectionState::Closing) {
            let reason = DisconnectReason::new("client disconnect", Some(NORMAL_CLOSURE), false);
            if self
                .events
                .try_send(LinkEvent::Disconnected(reason))
                .is_err()
            {
                debug!("Disconnected event not delivered");
            }
        }

        info!("Disconnected from {} (was {})", self.config.endpoint, was);
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A reconnect delay is currently running
    pub fn is_reconnecting(&self) -> bool {
        self.shared.inner.lock().reconnect_pending
    }

    /// Snapshot of the connection record
    pub fn status(&self) -> ConnectionData {
        self.shared.inner.lock().data.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn count_drop(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics
                .delivery()
                .messages_dropped_total
                .with_label_values(&[reason])
                .inc();
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
