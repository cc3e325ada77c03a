//! Stream Supervisor Integration Tests
//!
//! Drives the client over a scripted in-memory transport with a paused
//! clock: reconnect schedule, heartbeat timeout, subscribe acks, and
//! shutdown during each phase.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bybit_book_stream::{
    ConnectionState, Connector, StreamClient, StreamConfig, StreamEvent, Termination, Transport,
    TransportError,
};
use common::{FakeConnector, delta, snapshot};
use tokio::sync::mpsc;

type Events = mpsc::UnboundedReceiver<StreamEvent>;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn client_with(connector: Arc<dyn Connector>) -> (StreamClient, Events) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let client = StreamClient::with_connector(StreamConfig::default(), connector, event_tx).unwrap();
    (client, event_rx)
}

/// Receive events until one matches, returning everything seen.
async fn until(rx: &mut Events, done: impl Fn(&StreamEvent) -> bool) -> Vec<StreamEvent> {
    let mut seen = Vec::new();
    loop {
        let event = rx.recv().await.expect("event channel closed");
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

fn states(events: &[StreamEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn reconnects(events: &[StreamEvent]) -> Vec<(u32, Duration)> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect()
}

fn assert_gap(gap: Duration, expected: Duration) {
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(50),
        "gap {gap:?}, expected {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_reconnects() {
    let connector = FakeConnector::refusing();
    let (client, mut rx) = client_with(connector.clone());
    assert!(client.start().await);

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Terminated(_))).await;

    assert_eq!(
        events.last(),
        Some(&StreamEvent::Terminated(Termination::ReconnectExhausted {
            attempts: 5
        }))
    );
    assert_eq!(
        reconnects(&events),
        vec![
            (1, secs(5)),
            (2, secs(10)),
            (3, secs(15)),
            (4, secs(20)),
            (5, secs(25)),
        ]
    );
    let disconnects = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Disconnected { .. }))
        .count();
    assert_eq!(disconnects, 6);

    let opens = connector.opens();
    assert_eq!(opens.len(), 6);
    for (pair, expected) in opens.windows(2).zip([5, 10, 15, 20, 25]) {
        assert_gap(pair[1] - pair[0], secs(expected));
    }

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        client.close().await,
        Termination::ReconnectExhausted { attempts: 5 }
    );
    assert_eq!(
        client.termination(),
        Some(Termination::ReconnectExhausted { attempts: 5 })
    );
}

#[tokio::test(start_paused = true)]
async fn close_during_backoff() {
    let connector = FakeConnector::refusing();
    let (client, mut rx) = client_with(connector.clone());
    client.start().await;

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
    assert_eq!(
        states(&events),
        vec![ConnectionState::Connecting, ConnectionState::Disconnected]
    );

    // Into the 20 second wait before the fourth reconnect.
    until(&mut rx, |e| {
        matches!(e, StreamEvent::Reconnecting { attempt: 4, .. })
    })
    .await;
    tokio::time::sleep(secs(7)).await;

    assert_eq!(client.close().await, Termination::Closed);
    assert_eq!(connector.opens().len(), 4);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    assert_eq!(
        rx.recv().await,
        Some(StreamEvent::Terminated(Termination::Closed))
    );
    assert_eq!(client.close().await, Termination::Closed);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn live_session_round_trip() {
    let connector = Arc::new(FakeConnector::default());
    let mut remote = connector.accept_next();
    let (client, mut rx) = client_with(connector.clone());
    client.start().await;

    let request = remote.accept_subscribe().await;
    assert_eq!(request["args"], serde_json::json!(["orderbook.1.BTCUSDT"]));

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Subscribed(_))).await;
    assert_eq!(
        states(&events),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Subscribing,
            ConnectionState::Live,
        ]
    );
    let Some(StreamEvent::Subscribed(outcome)) = events.last() else {
        unreachable!()
    };
    assert_eq!(outcome.req_id.as_deref(), request["req_id"].as_str());
    assert_eq!(outcome.topics, vec!["orderbook.1.BTCUSDT".to_string()]);

    remote.push(snapshot("BTCUSDT", 1));
    remote.push("not json");
    remote.push(delta("BTCUSDT", 2));
    remote.push(delta("BTCUSDT", 3));

    let mut updates = Vec::new();
    while updates.len() < 3 {
        if let Some(StreamEvent::OrderBook(update)) = rx.recv().await {
            updates.push(update);
        }
    }
    let ids: Vec<_> = updates.iter().map(|u| u.update_id).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    assert!(updates[0].is_snapshot());
    assert_eq!(updates[0].best_bid().unwrap().price.to_string(), "16493.50");
    assert!(!updates[1].is_snapshot());

    // Server ping gets a pong.
    remote.push(r#"{"op":"ping"}"#);
    assert_eq!(remote.next_sent().await["op"], "pong");

    // Client ping after one interval, answered with the spot-style echo.
    let started = tokio::time::Instant::now();
    assert_eq!(remote.next_sent().await["op"], "ping");
    assert!(started.elapsed() <= secs(15));
    remote.push(r#"{"success":true,"ret_msg":"pong","conn_id":"fake-conn","req_id":"","op":"ping"}"#);

    tokio::time::sleep(secs(12)).await;
    assert_eq!(client.connection_state(), ConnectionState::Live);
    assert_eq!(connector.opens().len(), 1);

    assert_eq!(client.close().await, Termination::Closed);
    assert!(remote.is_closed());

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Terminated(_))).await;
    assert_eq!(
        states(&events),
        vec![ConnectionState::Closing, ConnectionState::Disconnected]
    );
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Terminated(Termination::Closed))
    );
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_reconnects_and_resets_attempts() {
    let connector = Arc::new(FakeConnector::default());
    let mut first = connector.accept_next();
    let mut second = connector.accept_next();
    let (client, mut rx) = client_with(connector.clone());
    client.start().await;

    first.accept_subscribe().await;
    assert_eq!(first.next_sent().await["op"], "ping");

    // No pong: the session is torn down pong_timeout after the ping.
    let events = until(&mut rx, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
    let reason = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Disconnected { reason } => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert!(reason.contains("heartbeat timeout"), "reason: {reason}");
    assert_eq!(reconnects(&events), vec![(1, secs(5))]);
    assert!(first.is_closed());

    second.accept_subscribe().await;
    let opens = connector.opens();
    assert_eq!(opens.len(), 2);
    // 15s to the ping, 10s pong timeout, 5s backoff.
    assert_gap(opens[1] - opens[0], secs(30));

    until(&mut rx, |e| matches!(e, StreamEvent::Subscribed(_))).await;
    second.hang_up();

    // The earlier attempt does not carry over once a connection went live.
    let events = until(&mut rx, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
    assert_eq!(reconnects(&events), vec![(1, secs(5))]);
    assert!(events.contains(&StreamEvent::Disconnected {
        reason: "stream ended".to_string()
    }));

    assert_eq!(client.close().await, Termination::Closed);
}

#[tokio::test(start_paused = true)]
async fn rejected_subscription_is_reported() {
    let connector = Arc::new(FakeConnector::default());
    let mut remote = connector.accept_next();
    let (client, mut rx) = client_with(connector.clone());
    client.start().await;

    let request = remote.next_sent().await;
    remote.push(
        serde_json::json!({
            "success": false,
            "ret_msg": "error:handler not found,topic:orderbook.1.BTCUSDT",
            "conn_id": "fake-conn",
            "req_id": request["req_id"],
            "op": "subscribe",
        })
        .to_string(),
    );

    let events = until(&mut rx, |e| matches!(e, StreamEvent::SubscribeFailed(_))).await;
    let Some(StreamEvent::SubscribeFailed(outcome)) = events.last() else {
        unreachable!()
    };
    assert!(!outcome.success);
    assert_eq!(
        outcome.message.as_deref(),
        Some("error:handler not found,topic:orderbook.1.BTCUSDT")
    );
    assert_eq!(client.connection_state(), ConnectionState::Live);

    // Frames for topics this client never asked for are dropped.
    remote.push(snapshot("ETHUSDT", 1));
    remote.push(r#"{"op":"ping"}"#);
    assert_eq!(remote.next_sent().await["op"], "pong");
    assert!(rx.try_recv().is_err());

    assert_eq!(client.close().await, Termination::Closed);
}

#[tokio::test(start_paused = true)]
async fn transport_error_triggers_reconnect() {
    let connector = Arc::new(FakeConnector::default());
    let mut remote = connector.accept_next();
    let (client, mut rx) = client_with(connector.clone());
    client.start().await;

    remote.accept_subscribe().await;
    until(&mut rx, |e| matches!(e, StreamEvent::Subscribed(_))).await;

    remote.fail(TransportError::RemoteClosed("1006".to_string()));
    let events = until(&mut rx, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
    assert_eq!(states(&events), vec![ConnectionState::Disconnected]);
    assert!(remote.is_closed());

    assert_eq!(client.close().await, Termination::Closed);
}

struct HangingConnector;

#[async_trait]
impl Connector for HangingConnector {
    async fn open(&self, _url: &str) -> Result<Transport, TransportError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_counts_as_failure() {
    let (client, mut rx) = client_with(Arc::new(HangingConnector));
    client.start().await;

    let started = tokio::time::Instant::now();
    let events = until(&mut rx, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
    assert_gap(started.elapsed(), secs(10));
    assert!(events.contains(&StreamEvent::Disconnected {
        reason: format!("transport error: connection timed out after {:?}", secs(10))
    }));

    assert_eq!(client.close().await, Termination::Closed);
}

#[tokio::test(start_paused = true)]
async fn close_while_connecting() {
    let (client, mut rx) = client_with(Arc::new(HangingConnector));
    client.start().await;

    until(&mut rx, |e| *e == StreamEvent::StateChanged(ConnectionState::Connecting)).await;
    assert_eq!(client.close().await, Termination::Closed);

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Terminated(_))).await;
    assert_eq!(
        states(&events),
        vec![ConnectionState::Closing, ConnectionState::Disconnected]
    );
}

#[tokio::test(start_paused = true)]
async fn close_returns_while_write_is_stuck() {
    let connector = Arc::new(FakeConnector::default());
    let mut remote = connector.accept_next();
    let (client, mut rx) = client_with(connector.clone());
    client.start().await;

    remote.accept_subscribe().await;
    until(&mut rx, |e| matches!(e, StreamEvent::Subscribed(_))).await;

    // The pong for this ping never finishes writing.
    remote.stall_writes();
    remote.push(r#"{"op":"ping"}"#);
    tokio::time::sleep(secs(1)).await;

    let started = tokio::time::Instant::now();
    let termination = tokio::time::timeout(secs(60), client.close())
        .await
        .expect("close() hung on a stuck write");
    assert_eq!(termination, Termination::Closed);
    // The stuck sink close is abandoned after the connect timeout.
    assert_gap(started.elapsed(), secs(10));
    assert!(!remote.is_closed());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Terminated(_))).await;
    assert_eq!(
        states(&events),
        vec![ConnectionState::Closing, ConnectionState::Disconnected]
    );
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Terminated(Termination::Closed))
    );
}

#[tokio::test(start_paused = true)]
async fn close_while_subscribe_write_is_stuck() {
    let connector = Arc::new(FakeConnector::default());
    let remote = connector.accept_next();
    remote.stall_writes();
    let (client, mut rx) = client_with(connector.clone());
    client.start().await;

    until(&mut rx, |e| *e == StreamEvent::StateChanged(ConnectionState::Subscribing)).await;

    let termination = tokio::time::timeout(secs(60), client.close())
        .await
        .expect("close() hung on a stuck subscribe");
    assert_eq!(termination, Termination::Closed);

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Terminated(_))).await;
    assert_eq!(
        states(&events),
        vec![ConnectionState::Closing, ConnectionState::Disconnected]
    );
    assert_eq!(connector.opens().len(), 1);
}

struct PanickingConnector;

#[async_trait]
impl Connector for PanickingConnector {
    async fn open(&self, _url: &str) -> Result<Transport, TransportError> {
        panic!("connector bug")
    }
}

#[tokio::test(start_paused = true)]
async fn supervisor_panic_is_reported() {
    let (client, mut rx) = client_with(Arc::new(PanickingConnector));
    client.start().await;

    let events = until(&mut rx, |e| matches!(e, StreamEvent::Terminated(_))).await;
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Terminated(Termination::Panicked))
    );
    assert_eq!(client.termination(), Some(Termination::Panicked));

    assert_eq!(client.close().await, Termination::Panicked);
    assert_eq!(client.close().await, Termination::Panicked);
    assert!(rx.try_recv().is_err());
}
