//! Background task driving one connection lifecycle

use super::{AfterClose, LinkConfig, Shared};
use crate::config::constants::{HEARTBEAT_TIMEOUT_CLOSURE, NORMAL_CLOSURE};
use crate::core::{
    now_ms, ConnectionState, DisconnectReason, Frame, LinkError, LinkEvent, LivenessFrame,
};
use crate::monitoring::LinkMetrics;
use crate::resilience::{
    DedupCache, ExponentialBackoff, Fingerprint, HeartbeatMonitor, HeartbeatStatus,
};
use crate::transport::{Connector, Inbound, Transport};
use prometheus::IntGauge;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

pub(crate) struct DriverContext<C: Connector> {
    pub(crate) config: Arc<LinkConfig>,
    pub(crate) connector: Arc<C>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) events: mpsc::Sender<LinkEvent>,
    pub(crate) metrics: Option<LinkMetrics>,
}

/// Why an open session ended
#[derive(Debug)]
enum SessionEnd {
    /// `disconnect()` was called
    Shutdown,
    /// Peer closed with a normal-closure code
    ClosedNormally { reason: String },
    /// Anything else; the reconnect path engages
    Lost { reason: String, code: Option<u16> },
}

/// Holds the shared `open` gauge up while one session runs
///
/// Several managers may report into one registry, so the gauge counts open
/// transports rather than flagging a single one.
struct OpenGauge(Option<IntGauge>);

impl OpenGauge {
    fn raise(metrics: Option<&LinkMetrics>) -> Self {
        let gauge = metrics.map(|m| m.connection().open.clone());
        if let Some(gauge) = &gauge {
            gauge.inc();
        }
        Self(gauge)
    }
}

impl Drop for OpenGauge {
    fn drop(&mut self) {
        if let Some(gauge) = &self.0 {
            gauge.dec();
        }
    }
}

impl<C: Connector> DriverContext<C> {
    fn emit(&self, event: LinkEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping {:?}", event);
                if let Some(metrics) = &self.metrics {
                    metrics.delivery().events_dropped_total.inc();
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Event receiver dropped");
            }
        }
    }

    fn with_metrics(&self, f: impl FnOnce(&LinkMetrics)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

/// Resolves once shutdown is requested or the manager handle is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run connection attempts, sessions, and reconnect delays until shutdown,
/// a normal close from the server, or exhausted retries
///
/// Expects the shared state to be Connecting on entry.
pub(crate) async fn run<C: Connector>(ctx: DriverContext<C>, mut shutdown: watch::Receiver<bool>) {
    let endpoint = ctx.config.endpoint.clone();
    let mut backoff = ExponentialBackoff::with_config(ctx.config.backoff.clone());
    // Survives reconnects so replays after a reconnect are suppressed
    let mut dedup = ctx.config.dedup.map(DedupCache::new);

    loop {
        if ctx.shared.user_closed() {
            break;
        }
        debug!(
            "Connection attempt to {} ({} reconnects so far)",
            endpoint,
            backoff.attempt_number()
        );

        let attempt = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            result = time::timeout(ctx.config.connect_timeout, ctx.connector.connect(&endpoint)) => result,
        };

        let lost = match attempt {
            Ok(Ok(transport)) => {
                backoff.reset();
                let (outbound_tx, outbound_rx) = mpsc::channel(ctx.config.outbound_capacity);
                ctx.shared.open(outbound_tx);
                ctx.with_metrics(|m| m.connection().connects_total.inc());
                let open_gauge = OpenGauge::raise(ctx.metrics.as_ref());
                info!("Connected to {}", endpoint);
                ctx.emit(LinkEvent::Connected);

                let end =
                    run_session(&ctx, transport, outbound_rx, &mut shutdown, dedup.as_mut()).await;
                ctx.shared.clear_outbound();
                drop(open_gauge);

                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::ClosedNormally { reason } => {
                        info!("Server closed {} normally: {}", endpoint, reason);
                        ctx.shared.settle(AfterClose::Stop);
                        ctx.emit(LinkEvent::Disconnected(DisconnectReason::new(
                            reason,
                            Some(NORMAL_CLOSURE),
                            false,
                        )));
                        return;
                    }
                    SessionEnd::Lost { reason, code } => {
                        warn!("Connection to {} lost: {}", endpoint, reason);
                        Some((reason, code))
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Connection attempt to {} failed: {}", endpoint, e);
                ctx.with_metrics(|m| m.connection().connect_failures_total.inc());
                None
            }
            Err(_) => {
                let e = LinkError::ConnectTimeout(ctx.config.connect_timeout);
                warn!("Connection attempt to {} failed: {}", endpoint, e);
                ctx.with_metrics(|m| m.connection().connect_failures_total.inc());
                None
            }
        };

        let plan = match backoff.next_delay() {
            Some(delay) => AfterClose::Retry(delay),
            None => AfterClose::GiveUp,
        };
        let plan = ctx.shared.settle(plan);

        if let Some((reason, code)) = lost {
            let will_reconnect = matches!(plan, AfterClose::Retry(_));
            ctx.emit(LinkEvent::Disconnected(DisconnectReason::new(
                reason,
                code,
                will_reconnect,
            )));
        }

        match plan {
            AfterClose::Stop => break,
            AfterClose::Retry(delay) => {
                let attempt = backoff.attempt_number();
                ctx.with_metrics(|m| {
                    m.connection().reconnects_scheduled_total.inc();
                    m.connection()
                        .reconnect_delay_seconds
                        .observe(delay.as_secs_f64());
                });
                info!("Reconnecting to {} in {:?} (attempt {})", endpoint, delay, attempt);
                ctx.emit(LinkEvent::Reconnecting { attempt, delay });

                let cancelled = tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => true,
                    _ = time::sleep(delay) => false,
                };
                ctx.shared.end_reconnect_delay(!cancelled);
                if cancelled {
                    debug!("Pending reconnect to {} cancelled", endpoint);
                    break;
                }
            }
            AfterClose::GiveUp => {
                let attempts = backoff.attempt_number();
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    endpoint, attempts
                );
                ctx.with_metrics(|m| m.connection().retries_exhausted_total.inc());
                ctx.emit(LinkEvent::Error(LinkError::RetriesExhausted { attempts }));
                return;
            }
        }
    }

    debug!("Connection driver for {} stopped", endpoint);
}

/// Pump one open transport until it ends
async fn run_session<C: Connector>(
    ctx: &DriverContext<C>,
    mut transport: C::Transport,
    mut outbound: mpsc::Receiver<String>,
    shutdown: &mut watch::Receiver<bool>,
    mut dedup: Option<&mut DedupCache>,
) -> SessionEnd {
    let heartbeat_config = ctx.config.heartbeat;
    let mut heartbeat = HeartbeatMonitor::new(heartbeat_config, Instant::now());

    if let Err(end) = send_ping(ctx, &mut transport, shutdown, &mut heartbeat).await {
        return end;
    }

    let mut ticker = time::interval_at(
        Instant::now() + heartbeat_config.interval,
        heartbeat_config.interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_requested(shutdown) => {
                return shut_down(ctx, &mut transport).await;
            }

            _ = ticker.tick() => {
                match heartbeat.tick(Instant::now()) {
                    HeartbeatStatus::Expired { elapsed } => {
                        let e = LinkError::HeartbeatTimeout {
                            elapsed,
                            timeout: heartbeat_config.timeout,
                        };
                        warn!("{}", e);
                        ctx.with_metrics(|m| m.connection().heartbeat_timeouts_total.inc());
                        close_quietly(ctx, &mut transport, HEARTBEAT_TIMEOUT_CLOSURE, "heartbeat timeout").await;
                        return SessionEnd::Lost {
                            reason: e.to_string(),
                            code: Some(HEARTBEAT_TIMEOUT_CLOSURE),
                        };
                    }
                    HeartbeatStatus::Alive => {
                        if let Err(end) = send_ping(ctx, &mut transport, shutdown, &mut heartbeat).await {
                            return end;
                        }
                    }
                }
            }

            Some(text) = outbound.recv() => {
                if let Err(end) = write_frame(ctx, &mut transport, shutdown, text).await {
                    return end;
                }
                ctx.with_metrics(|m| m.delivery().messages_sent_total.inc());
            }

            inbound = transport.recv() => {
                let item = match inbound {
                    None => {
                        return SessionEnd::Lost {
                            reason: "stream ended".to_string(),
                            code: None,
                        };
                    }
                    Some(Err(e @ LinkError::MalformedFrame { .. })) => {
                        report_malformed(ctx, e);
                        continue;
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Lost { reason: e.to_string(), code: None };
                    }
                    Some(Ok(item)) => item,
                };

                match item {
                    Inbound::Pong => {
                        heartbeat.mark_alive(Instant::now());
                        ctx.shared.mark_heartbeat();
                    }
                    Inbound::Closed { code, reason } => {
                        if code == Some(NORMAL_CLOSURE) {
                            return SessionEnd::ClosedNormally { reason };
                        }
                        let reason = if reason.is_empty() {
                            "closed by server".to_string()
                        } else {
                            reason
                        };
                        return SessionEnd::Lost { reason, code };
                    }
                    Inbound::Text(text) => {
                        let routed = handle_text(
                            ctx,
                            &mut transport,
                            shutdown,
                            &mut heartbeat,
                            dedup.as_deref_mut(),
                            &text,
                        )
                        .await;
                        if let Err(end) = routed {
                            return end;
                        }
                    }
                }
            }
        }
    }
}

/// Route one inbound text frame; fails only when a reply could not be written
async fn handle_text<C: Connector>(
    ctx: &DriverContext<C>,
    transport: &mut C::Transport,
    shutdown: &mut watch::Receiver<bool>,
    heartbeat: &mut HeartbeatMonitor,
    dedup: Option<&mut DedupCache>,
    text: &str,
) -> Result<(), SessionEnd> {
    match Frame::parse(text) {
        Err(e) => report_malformed(ctx, e),
        Ok(Frame::Liveness(LivenessFrame::Pong { .. })) => {
            heartbeat.mark_alive(Instant::now());
            ctx.shared.mark_heartbeat();
        }
        Ok(Frame::Liveness(LivenessFrame::Ping { timestamp })) => {
            heartbeat.mark_alive(Instant::now());
            ctx.shared.mark_heartbeat();
            let pong = LivenessFrame::Pong { timestamp }.to_text();
            write_frame(ctx, transport, shutdown, pong).await?;
        }
        Ok(Frame::Data(frame)) => {
            if let Some(cache) = dedup {
                if !cache.check_and_remember(Fingerprint::of_frame(&frame)) {
                    debug!("Suppressed duplicate frame (id {:?})", frame.id);
                    ctx.with_metrics(|m| m.delivery().duplicates_suppressed_total.inc());
                    return Ok(());
                }
            }
            ctx.with_metrics(|m| m.delivery().messages_received_total.inc());
            ctx.emit(LinkEvent::Message(frame));
        }
    }
    Ok(())
}

fn report_malformed<C: Connector>(ctx: &DriverContext<C>, e: LinkError) {
    warn!("Discarding inbound frame: {}", e);
    ctx.with_metrics(|m| m.delivery().malformed_frames_total.inc());
    ctx.emit(LinkEvent::Error(e));
}

async fn send_ping<C: Connector>(
    ctx: &DriverContext<C>,
    transport: &mut C::Transport,
    shutdown: &mut watch::Receiver<bool>,
    heartbeat: &mut HeartbeatMonitor,
) -> Result<(), SessionEnd> {
    let ping = LivenessFrame::Ping {
        timestamp: now_ms(),
    };
    write_frame(ctx, transport, shutdown, ping.to_text()).await?;
    heartbeat.mark_ping_sent();
    trace!("Liveness ping sent");
    Ok(())
}

/// Write one frame, bounded by the heartbeat timeout and racing shutdown
///
/// A write that cannot finish within the timeout means the peer stopped
/// draining the socket; the session is treated as lost.
async fn write_frame<C: Connector>(
    ctx: &DriverContext<C>,
    transport: &mut C::Transport,
    shutdown: &mut watch::Receiver<bool>,
    text: String,
) -> Result<(), SessionEnd> {
    let limit = ctx.config.heartbeat.timeout;
    let written = tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => None,
        result = time::timeout(limit, transport.send(text)) => Some(result),
    };

    match written {
        Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(e))) => Err(SessionEnd::Lost {
            reason: e.to_string(),
            code: None,
        }),
        Some(Err(_)) => {
            let e = LinkError::WriteTimeout(limit);
            warn!("{}", e);
            Err(SessionEnd::Lost {
                reason: e.to_string(),
                code: None,
            })
        }
        None => Err(shut_down(ctx, transport).await),
    }
}

async fn shut_down<C: Connector>(ctx: &DriverContext<C>, transport: &mut C::Transport) -> SessionEnd {
    ctx.shared.set_state(ConnectionState::Closing);
    close_quietly(ctx, transport, NORMAL_CLOSURE, "client disconnect").await;
    SessionEnd::Shutdown
}

/// Best-effort close bounded by the connect timeout
async fn close_quietly<C: Connector>(
    ctx: &DriverContext<C>,
    transport: &mut C::Transport,
    code: u16,
    reason: &str,
) {
    match time::timeout(ctx.config.connect_timeout, transport.close(code, reason)).await {
        Ok(Ok(())) => debug!("Sent close frame {} ({})", code, reason),
        Ok(Err(e)) => debug!("Close handshake failed: {}", e),
        Err(_) => debug!("Close handshake timed out"),
    }
}
