//! Connection manager lifecycle tests
//!
//! Runs the manager against the scripted mock transport with tokio's clock
//! paused, so heartbeat intervals and backoff delays elapse instantly.
//!
//! These tests verify:
//! 1. connect() is idempotent and sends are at-most-once
//! 2. Heartbeat expiry forces exactly one reconnect cycle
//! 3. Backoff restarts from the base delay after a successful open
//! 4. disconnect() cancels pending reconnects
//! 5. Malformed and duplicate frames never tear the stream down
//! 6. A write that never completes is treated as a lost connection

use citylink_core::core::DisconnectReason;
use citylink_core::monitoring::LinkMetrics;
use citylink_core::prelude::*;
use citylink_core::testing::{ClientFrame, ConnectPlan, MockConnector, MockSession};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const ENDPOINT: &str = "ws://mock.invalid/stream";

fn test_config() -> LinkConfig {
    LinkConfig::new(ENDPOINT)
        .with_heartbeat(HeartbeatConfig::new(Duration::from_secs(1), Duration::from_secs(3)).unwrap())
        .with_backoff(BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_retries: Some(3),
            jitter_factor: 0.0,
        })
        .with_connect_timeout(Duration::from_secs(2))
}

fn manager(
    connector: &MockConnector,
) -> (ConnectionManager<MockConnector>, mpsc::Receiver<LinkEvent>) {
    ConnectionManager::new(test_config(), connector.clone()).unwrap()
}

async fn next_event(rx: &mut mpsc::Receiver<LinkEvent>) -> LinkEvent {
    timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_session(connector: &MockConnector) -> MockSession {
    timeout(Duration::from_secs(120), connector.next_session())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}

/// Next non-liveness text the client wrote
async fn next_client_data(session: &mut MockSession) -> String {
    loop {
        let frame = timeout(Duration::from_secs(120), session.next_from_client())
            .await
            .expect("timed out waiting for client frame")
            .expect("client side closed");
        if let ClientFrame::Text(text) = frame {
            if !text.contains("\"ping\"") && !text.contains("\"pong\"") {
                return text;
            }
        }
    }
}

async fn open(
    connector: &MockConnector,
) -> (
    ConnectionManager<MockConnector>,
    mpsc::Receiver<LinkEvent>,
    MockSession,
) {
    let (mut link, mut rx) = manager(connector);
    link.connect();
    let session = next_session(connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
    (link, rx, session)
}

fn assert_disconnected(event: LinkEvent) -> DisconnectReason {
    match event {
        LinkEvent::Disconnected(reason) => reason,
        other => panic!("expected Disconnected, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_and_pings_immediately() {
    let connector = MockConnector::new();
    let (mut link, mut rx) = manager(&connector);
    assert_eq!(link.state(), ConnectionState::Idle);

    link.connect();
    assert_eq!(link.state(), ConnectionState::Connecting);

    let mut session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
    assert!(link.is_open());

    let first = session.next_from_client().await.unwrap();
    assert!(first.is_ping(), "first frame should be a liveness ping");

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let connector = MockConnector::new();
    let (mut link, mut rx) = manager(&connector);

    link.connect();
    link.connect();
    let _session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
    link.connect();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(link.state(), ConnectionState::Open);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_sends_preserve_order() {
    let connector = MockConnector::new();
    let (mut link, _rx, mut session) = open(&connector).await;

    for n in 1..=3 {
        assert_eq!(link.send(format!(r#"{{"n":{}}}"#, n)), SendOutcome::Queued);
    }

    assert_eq!(next_client_data(&mut session).await, r#"{"n":1}"#);
    assert_eq!(next_client_data(&mut session).await, r#"{"n":2}"#);
    assert_eq!(next_client_data(&mut session).await, r#"{"n":3}"#);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_json() {
    let connector = MockConnector::new();
    let (mut link, _rx, mut session) = open(&connector).await;

    let outcome = link
        .send_json(&serde_json::json!({"type": "subscribe", "channel": "metrics"}))
        .unwrap();
    assert!(outcome.is_queued());
    assert!(next_client_data(&mut session).await.contains("subscribe"));

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_dropped_when_not_open() {
    let connector = MockConnector::new();
    let (mut link, mut rx) = manager(&connector);

    // Idle
    assert_eq!(link.send("early"), SendOutcome::NotOpen);

    link.connect();
    let session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);

    session.end_stream();
    let reason = assert_disconnected(next_event(&mut rx).await);
    assert!(reason.will_reconnect);

    // Closed, waiting out the backoff delay
    assert!(matches!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting { attempt: 1, .. }
    ));
    assert_eq!(link.send("lost"), SendOutcome::NotOpen);

    let mut session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
    link.send("fresh");

    // The dropped message is never replayed on the new connection
    assert_eq!(next_client_data(&mut session).await, "fresh");

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_sends_normal_close() {
    let connector = MockConnector::new();
    let (mut link, mut rx, mut session) = open(&connector).await;

    link.disconnect().await;
    assert_eq!(link.state(), ConnectionState::Closed);

    let frames = session.drain_from_client();
    assert!(frames.contains(&ClientFrame::Close(1000)));

    let reason = assert_disconnected(next_event(&mut rx).await);
    assert_eq!(reason.code, Some(1000));
    assert!(!reason.will_reconnect);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let connector = MockConnector::with_plan(vec![ConnectPlan::Refuse("down".into())]);
    let (mut link, mut rx) = manager(&connector);

    link.connect();
    match next_event(&mut rx).await {
        LinkEvent::Reconnecting { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_millis(100));
        }
        other => panic!("expected Reconnecting, got {:?}", other),
    }
    assert!(link.is_reconnecting());

    link.disconnect().await;
    sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(link.state(), ConnectionState::Closed);
    assert!(!link.is_reconnecting());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_handshake() {
    let connector = MockConnector::with_plan(vec![ConnectPlan::Hang]);
    let (mut link, _rx) = manager(&connector);

    link.connect();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(link.state(), ConnectionState::Connecting);

    link.disconnect().await;
    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(link.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_schedules_reconnect() {
    let connector = MockConnector::with_plan(vec![ConnectPlan::Hang]);
    let (mut link, mut rx) = manager(&connector);

    link.connect();
    assert!(matches!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting { attempt: 1, .. }
    ));
    let _session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
    assert_eq!(connector.attempts(), 2);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_connection_alive() {
    let connector = MockConnector::new();
    let (mut link, _rx, _session) = open(&connector).await;

    sleep(Duration::from_secs(30)).await;

    assert_eq!(link.state(), ConnectionState::Open);
    assert_eq!(connector.attempts(), 1);
    assert!(link.status().last_heartbeat_at.is_some());

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_forces_single_reconnect() {
    let connector = MockConnector::new().without_auto_pong();
    let (mut link, mut rx, mut silent) = open(&connector).await;

    let reason = assert_disconnected(next_event(&mut rx).await);
    assert_eq!(reason.code, Some(4000));
    assert!(reason.will_reconnect);

    assert!(matches!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting { attempt: 1, .. }
    ));
    let _second = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);

    // One forced close, one new connection
    assert_eq!(connector.attempts(), 2);
    let frames = silent.drain_from_client();
    assert_eq!(
        frames
            .iter()
            .filter(|frame| matches!(frame, ClientFrame::Close(_)))
            .count(),
        1
    );
    assert!(frames.contains(&ClientFrame::Close(4000)));

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_write_forces_single_reconnect() {
    // Initial ping goes through, everything after it hangs
    let connector = MockConnector::with_plan(vec![ConnectPlan::AcceptStalling { after: 1 }]);
    let (mut link, mut rx, mut stalled) = open(&connector).await;

    assert_eq!(link.send("x"), SendOutcome::Queued);

    let reason = assert_disconnected(next_event(&mut rx).await);
    assert!(reason.will_reconnect);
    assert!(reason.message.contains("write stalled"), "{}", reason.message);

    assert!(matches!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting { attempt: 1, .. }
    ));
    let _second = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
    assert!(stalled.drain_data_from_client().is_empty());

    // The replacement connection stays up
    sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 2);
    assert!(link.is_open());

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_returns_during_stalled_write() {
    let connector = MockConnector::with_plan(vec![ConnectPlan::AcceptStalling { after: 1 }]);
    let (mut link, mut rx, mut stalled) = open(&connector).await;

    assert_eq!(link.send("x"), SendOutcome::Queued);
    sleep(Duration::from_millis(500)).await;
    assert!(link.is_open());

    timeout(Duration::from_secs(1), link.disconnect())
        .await
        .expect("disconnect blocked behind a pending write");
    assert_eq!(link.state(), ConnectionState::Closed);

    let reason = assert_disconnected(next_event(&mut rx).await);
    assert_eq!(reason.code, Some(1000));
    assert!(!reason.will_reconnect);

    let frames = stalled.drain_from_client();
    assert!(frames.contains(&ClientFrame::Close(1000)));
    assert!(!frames.contains(&ClientFrame::Text("x".to_string())));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_manual_pongs_reset_heartbeat() {
    let connector = MockConnector::new().without_auto_pong();
    let (mut link, _rx, session) = open(&connector).await;

    // Answer well inside the 3s timeout for 20s
    for _ in 0..20 {
        sleep(Duration::from_secs(1)).await;
        session.push_pong(0);
    }

    assert_eq!(link.state(), ConnectionState::Open);
    assert_eq!(connector.attempts(), 1);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_ping_is_answered() {
    let connector = MockConnector::new();
    let (mut link, _rx, mut session) = open(&connector).await;

    session.push_text(r#"{"type":"ping","timestamp":42}"#);

    loop {
        match session.next_from_client().await.unwrap() {
            ClientFrame::Text(text) if text.contains("pong") => {
                assert!(text.contains("42"));
                break;
            }
            _ => continue,
        }
    }

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_open() {
    let connector = MockConnector::with_plan(vec![
        ConnectPlan::Refuse("down".into()),
        ConnectPlan::Refuse("still down".into()),
    ]);
    let (mut link, mut rx) = manager(&connector);
    link.connect();

    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(200)
        }
    );

    let session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);
    assert_eq!(link.status().reconnect_attempts, 0);

    session.end_stream();
    assert_disconnected(next_event(&mut rx).await);

    // Starts over from the base delay
    assert_eq!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(100)
        }
    );

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_is_terminal() {
    let connector = MockConnector::with_plan(vec![
        ConnectPlan::Refuse("down".into()),
        ConnectPlan::Refuse("down".into()),
        ConnectPlan::Refuse("down".into()),
        ConnectPlan::Refuse("down".into()),
    ]);
    let (mut link, mut rx) = manager(&connector);
    link.connect();

    for expected in 1..=3 {
        match next_event(&mut rx).await {
            LinkEvent::Reconnecting { attempt, .. } => assert_eq!(attempt, expected),
            other => panic!("expected Reconnecting, got {:?}", other),
        }
    }

    match next_event(&mut rx).await {
        LinkEvent::Error(e) => {
            assert_eq!(e, LinkError::RetriesExhausted { attempts: 3 });
            assert!(!e.is_recoverable());
        }
        other => panic!("expected terminal error, got {:?}", other),
    }
    assert_eq!(link.state(), ConnectionState::Failed);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 4);

    // An explicit connect() starts a fresh lifecycle
    link.connect();
    let _session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_keeps_connection() {
    let connector = MockConnector::new();
    let (mut link, mut rx, session) = open(&connector).await;

    session.push_text("definitely not json");
    match next_event(&mut rx).await {
        LinkEvent::Error(e) => {
            assert!(matches!(e, LinkError::MalformedFrame { .. }));
            assert!(e.is_recoverable());
        }
        other => panic!("expected malformed frame error, got {:?}", other),
    }

    session.push_text(r#"{"id":"evt-1","value":7}"#);
    match next_event(&mut rx).await {
        LinkEvent::Message(frame) => assert_eq!(frame.payload["value"], 7),
        other => panic!("expected Message, got {:?}", other),
    }

    assert_eq!(link.state(), ConnectionState::Open);
    assert_eq!(connector.attempts(), 1);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_frames_suppressed() {
    let connector = MockConnector::new();
    let (mut link, mut rx, session) = open(&connector).await;

    session.push_text(r#"{"id":"evt-1","value":1}"#);
    session.push_text(r#"{"id":"evt-1","value":1}"#);
    session.push_text(r#"{"id":"evt-2","value":2}"#);

    let ids: Vec<_> = [next_event(&mut rx).await, next_event(&mut rx).await]
        .into_iter()
        .map(|event| match event {
            LinkEvent::Message(frame) => frame.id,
            other => panic!("expected Message, got {:?}", other),
        })
        .collect();
    assert_eq!(ids, vec![Some("evt-1".to_string()), Some("evt-2".to_string())]);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_replay_after_reconnect_suppressed() {
    let connector = MockConnector::new();
    let (mut link, mut rx, session) = open(&connector).await;

    session.push_text(r#"{"id":"evt-1"}"#);
    assert!(matches!(next_event(&mut rx).await, LinkEvent::Message(_)));

    session.end_stream();
    assert_disconnected(next_event(&mut rx).await);
    assert!(matches!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting { .. }
    ));

    let session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);

    // Backlog replay
    session.push_text(r#"{"id":"evt-1"}"#);
    session.push_text(r#"{"id":"evt-2"}"#);
    match next_event(&mut rx).await {
        LinkEvent::Message(frame) => assert_eq!(frame.id.as_deref(), Some("evt-2")),
        other => panic!("expected Message, got {:?}", other),
    }

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_normal_close_does_not_reconnect() {
    let connector = MockConnector::new();
    let (mut link, mut rx, session) = open(&connector).await;

    session.push_close(1000, "maintenance");
    let reason = assert_disconnected(next_event(&mut rx).await);
    assert_eq!(reason.code, Some(1000));
    assert!(!reason.will_reconnect);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(link.state(), ConnectionState::Closed);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_reconnects() {
    let connector = MockConnector::new();
    let (mut link, mut rx, session) = open(&connector).await;

    session.push_close(1011, "server restart");
    let reason = assert_disconnected(next_event(&mut rx).await);
    assert_eq!(reason.code, Some(1011));
    assert_eq!(reason.message, "server restart");
    assert!(reason.will_reconnect);

    assert!(matches!(
        next_event(&mut rx).await,
        LinkEvent::Reconnecting { attempt: 1, .. }
    ));
    let _session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_reconnects() {
    let connector = MockConnector::new();
    let (mut link, mut rx, session) = open(&connector).await;

    session.push_error("connection reset by peer");
    let reason = assert_disconnected(next_event(&mut rx).await);
    assert!(reason.message.contains("connection reset"));
    assert!(reason.will_reconnect);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_tracks_lifecycle() {
    let connector = MockConnector::new();
    let (mut link, mut rx, session) = open(&connector).await;

    let status = link.status();
    assert_eq!(status.endpoint, ENDPOINT);
    assert_eq!(status.total_attempts, 1);
    assert!(status.last_connected_at.is_some());

    session.end_stream();
    assert_disconnected(next_event(&mut rx).await);
    assert_eq!(link.status().disconnect_count, 1);

    link.disconnect().await;
    assert!(link.status().user_initiated_close);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_recorded() {
    let metrics = LinkMetrics::new().unwrap();
    let connector = MockConnector::new();
    let (link, mut rx) = manager(&connector);
    let mut link = link.with_metrics(metrics.clone());

    link.send("dropped");
    link.connect();
    let session = next_session(&connector).await;
    assert_eq!(next_event(&mut rx).await, LinkEvent::Connected);

    session.push_text(r#"{"id":"a"}"#);
    session.push_text(r#"{"id":"a"}"#);
    session.push_text("garbage");
    assert!(matches!(next_event(&mut rx).await, LinkEvent::Message(_)));
    assert!(matches!(next_event(&mut rx).await, LinkEvent::Error(_)));

    assert_eq!(metrics.connection().connects_total.get(), 1);
    assert_eq!(metrics.connection().open.get(), 1);
    assert_eq!(metrics.delivery().messages_received_total.get(), 1);
    assert_eq!(metrics.delivery().duplicates_suppressed_total.get(), 1);
    assert_eq!(metrics.delivery().malformed_frames_total.get(), 1);
    assert_eq!(
        metrics
            .delivery()
            .messages_dropped_total
            .with_label_values(&["not_open"])
            .get(),
        1
    );

    link.disconnect().await;
    assert_eq!(metrics.connection().open.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_gauge_counts_each_manager() {
    let metrics = LinkMetrics::new().unwrap();
    let first = MockConnector::new();
    let second = MockConnector::new();

    let (link_a, mut rx_a) = manager(&first);
    let mut link_a = link_a.with_metrics(metrics.clone());
    let (link_b, mut rx_b) = manager(&second);
    let mut link_b = link_b.with_metrics(metrics.clone());

    link_a.connect();
    link_b.connect();
    let _session_a = next_session(&first).await;
    let _session_b = next_session(&second).await;
    assert_eq!(next_event(&mut rx_a).await, LinkEvent::Connected);
    assert_eq!(next_event(&mut rx_b).await, LinkEvent::Connected);
    assert_eq!(metrics.connection().open.get(), 2);

    link_b.disconnect().await;
    assert_eq!(metrics.connection().open.get(), 1);
    assert!(link_a.is_open());

    link_a.disconnect().await;
    assert_eq!(metrics.connection().open.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_event_handlers_adapter() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let connected = Arc::new(AtomicUsize::new(0));
    let messages = Arc::new(AtomicUsize::new(0));

    let handlers = {
        let connected = Arc::clone(&connected);
        let messages = Arc::clone(&messages);
        EventHandlers::new()
            .on_connected(move || {
                connected.fetch_add(1, Ordering::SeqCst);
            })
            .on_message(move |_| {
                messages.fetch_add(1, Ordering::SeqCst);
            })
    };

    let connector = MockConnector::new();
    let (mut link, rx) = manager(&connector);
    let pump = tokio::spawn(async move { handlers.pump(rx).await });

    link.connect();
    let session = next_session(&connector).await;
    session.push_text(r#"{"id":"x"}"#);
    sleep(Duration::from_secs(1)).await;

    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(messages.load(Ordering::SeqCst), 1);

    link.disconnect().await;
    drop(link);
    timeout(Duration::from_secs(5), pump).await.unwrap().unwrap();
}
