//! Interactive realtime stream client
//!
//! Connects to a realtime endpoint and:
//! - prints every deduplicated inbound message as one JSON line on stdout
//! - sends each stdin line as an outbound message, subject to the
//!   per-identity rate limit
//! - reports reconnects, and exits on Ctrl+C or terminal failure

use anyhow::Result;
use citylink_bins::common::{format_countdown, init_logging, load_settings, CommonArgs};
use citylink_core::monitoring::LinkMetrics;
use citylink_core::prelude::*;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Identity charged for outbound messages
    #[arg(short, long, default_value = "local")]
    identity: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.common)?;

    let settings = load_settings(&args.common)?;
    let metrics = LinkMetrics::new()?;
    let limiter = settings.limiter.with_metrics(metrics.clone());

    info!("=== CityLink watch ===");
    info!("Endpoint: {}", settings.link.endpoint);
    info!("Identity: {}", args.identity);

    let (link, mut events) = ConnectionManager::new(settings.link, WsConnector::new())?;
    let mut link = link.with_metrics(metrics.clone());

    // Setup Ctrl+C handler
    let shutdown = Arc::new(Notify::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        warn!("Received Ctrl+C, initiating graceful shutdown...");
        shutdown_ctrlc.notify_one();
    })?;

    link.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut exit_error = None;

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,

            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    LinkEvent::Connected => info!("Connected"),
                    LinkEvent::Disconnected(reason) => warn!("Disconnected: {}", reason),
                    LinkEvent::Reconnecting { attempt, delay } => {
                        info!("Reconnecting in {:?} (attempt {})", delay, attempt);
                    }
                    LinkEvent::Message(frame) => println!("{}", frame.payload),
                    LinkEvent::Error(e) if e.is_recoverable() => warn!("{}", e),
                    LinkEvent::Error(e) => {
                        error!("Giving up: {}", e);
                        exit_error = Some(e);
                        break;
                    }
                }
            }

            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => send_limited(&link, &limiter, &args.identity, line),
                    None => stdin_open = false,
                }
            }
        }
    }

    link.disconnect().await;

    if args.common.metrics {
        print!("{}", metrics.encode()?);
    }

    match exit_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Send one line if the identity still has quota, recording it on success
fn send_limited(
    link: &ConnectionManager<WsConnector>,
    limiter: &RateLimiter,
    identity: &str,
    line: String,
) {
    let status = limiter.check_limit(identity);
    if status.is_limited {
        let countdown = limiter
            .time_until_reset(identity)
            .map(format_countdown)
            .unwrap_or_else(|| "soon".to_string());
        warn!("Rate limited: 0 messages left, quota returns in {}", countdown);
        return;
    }

    let summary = line.clone();
    match link.send(line) {
        SendOutcome::Queued => {
            let status = limiter.record_action(identity, &summary);
            info!("Sent ({} left in this window)", status.remaining);
        }
        SendOutcome::NotOpen => warn!("Not connected, message dropped"),
        SendOutcome::Backpressure => warn!("Outbound queue full, message dropped"),
    }
}
