//! Scripted in-memory transport for testing
//!
//! Each `connect()` consumes the next [`ConnectPlan`] (accepting when the
//! script is empty). Every accepted connection yields a [`MockSession`]
//! that plays the server side: push inbound items, observe what the client
//! sent, or drop it to end the stream.

use crate::core::{Frame, LinkError, LivenessFrame, Result};
use crate::transport::{Connector, Inbound, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome of one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectPlan {
    /// Handshake succeeds
    Accept,
    /// Handshake fails with a transport error
    Refuse(String),
    /// Handshake never completes (exercises the connect timeout)
    Hang,
    /// Handshake succeeds, but every client write after the first `after`
    /// never completes (a peer that stopped draining its socket)
    AcceptStalling { after: usize },
}

/// What the client did on a mock connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Close(u16),
}

impl ClientFrame {
    /// Whether this is a JSON liveness ping
    pub fn is_ping(&self) -> bool {
        match self {
            ClientFrame::Text(text) => matches!(
                Frame::parse(text),
                Ok(Frame::Liveness(LivenessFrame::Ping { .. }))
            ),
            ClientFrame::Close(_) => false,
        }
    }
}

/// Server side of one accepted mock connection
pub struct MockSession {
    to_client: mpsc::UnboundedSender<Result<Inbound>>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl MockSession {
    /// Deliver a text frame to the client
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Ok(Inbound::Text(text.into())));
    }

    /// Deliver a JSON pong
    pub fn push_pong(&self, timestamp: u64) {
        self.push_text(LivenessFrame::Pong { timestamp }.to_text());
    }

    /// Deliver a close frame
    pub fn push_close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Ok(Inbound::Closed {
            code: Some(code),
            reason: reason.to_string(),
        }));
    }

    /// Deliver a transport error
    pub fn push_error(&self, message: &str) {
        let _ = self
            .to_client
            .send(Err(LinkError::Transport(message.to_string())));
    }

    /// Next frame the client sent, waiting for it
    pub async fn next_from_client(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }

    /// End the stream as if the socket vanished without a close frame
    pub fn end_stream(self) {
        drop(self);
    }

    /// Everything the client has sent so far, without waiting
    pub fn drain_from_client(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Client data frames sent so far (liveness pings filtered out)
    pub fn drain_data_from_client(&mut self) -> Vec<String> {
        self.drain_from_client()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Text(text) => match Frame::parse(&text) {
                    Ok(Frame::Liveness(_)) => None,
                    _ => Some(text),
                },
                ClientFrame::Close(_) => None,
            })
            .collect()
    }
}

struct MockState {
    plan: VecDeque<ConnectPlan>,
    auto_pong: bool,
}

/// Scripted [`Connector`]
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    attempts: Arc<AtomicUsize>,
    sessions_tx: mpsc::UnboundedSender<MockSession>,
    sessions_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockSession>>>,
}

impl MockConnector {
    /// Accepts every connection; pings are answered automatically
    pub fn new() -> Self {
        Self::with_plan(Vec::new())
    }

    /// Follows `plan`, then accepts
    pub fn with_plan(plan: Vec<ConnectPlan>) -> Self {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockState {
                plan: plan.into(),
                auto_pong: true,
            })),
            attempts: Arc::new(AtomicUsize::new(0)),
            sessions_tx,
            sessions_rx: Arc::new(tokio::sync::Mutex::new(sessions_rx)),
        }
    }

    /// Stop answering pings (simulates a silently dead server)
    pub fn without_auto_pong(self) -> Self {
        self.state.lock().auto_pong = false;
        self
    }

    /// Append outcomes for future attempts
    pub fn push_plan(&self, plan: ConnectPlan) {
        self.state.lock().plan.push_back(plan);
    }

    /// Number of `connect()` invocations so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection
    pub async fn next_session(&self) -> Option<MockSession> {
        self.sessions_rx.lock().await.recv().await
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _endpoint: &str) -> Result<MockTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (plan, auto_pong) = {
            let mut state = self.state.lock();
            (
                state.plan.pop_front().unwrap_or(ConnectPlan::Accept),
                state.auto_pong,
            )
        };

        let stall_after = match plan {
            ConnectPlan::Accept => None,
            ConnectPlan::AcceptStalling { after } => Some(after),
            ConnectPlan::Refuse(reason) => return Err(LinkError::Transport(reason)),
            ConnectPlan::Hang => std::future::pending().await,
        };

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let transport = MockTransport {
            inbound,
            outbound,
            loopback: to_client.downgrade(),
            auto_pong,
            stall_after,
            written: 0,
        };
        let _ = self.sessions_tx.send(MockSession {
            to_client,
            from_client,
        });
        Ok(transport)
    }
}

/// Client side of a mock connection
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Result<Inbound>>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    loopback: mpsc::WeakUnboundedSender<Result<Inbound>>,
    auto_pong: bool,
    stall_after: Option<usize>,
    written: usize,
}

impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.stall_after.is_some_and(|after| self.written >= after) {
            return std::future::pending().await;
        }
        self.written += 1;

        if self.auto_pong {
            if let Ok(Frame::Liveness(LivenessFrame::Ping { timestamp })) = Frame::parse(&text) {
                if let Some(loopback) = self.loopback.upgrade() {
                    let pong = LivenessFrame::Pong { timestamp }.to_text();
                    let _ = loopback.send(Ok(Inbound::Text(pong)));
                }
            }
        }
        self.outbound
            .send(ClientFrame::Text(text))
            .map_err(|_| LinkError::Transport("mock server went away".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<()> {
        let _ = self.outbound.send(ClientFrame::Close(code));
        Ok(())
    }
}
