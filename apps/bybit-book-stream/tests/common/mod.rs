//! Scripted in-memory transport for driving the stream client.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bybit_book_stream::{Connector, FrameSink, FrameStream, RawFrame, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server side of one fake connection.
pub struct Remote {
    /// Frames the client sent, in order.
    pub sent: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<Result<RawFrame, TransportError>>>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl Remote {
    /// Deliver a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(RawFrame::Text(text.into())));
        }
    }

    /// Deliver a transport error to the client.
    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(error));
        }
    }

    /// End the inbound stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next frame the client sent, parsed as JSON.
    pub async fn next_sent(&mut self) -> Value {
        let text = self.sent.recv().await.expect("client sent nothing");
        serde_json::from_str(&text).unwrap()
    }

    /// Wait for the subscribe request and acknowledge it.
    pub async fn accept_subscribe(&mut self) -> Value {
        let request = self.next_sent().await;
        assert_eq!(request["op"], "subscribe");
        self.push(
            serde_json::json!({
                "success": true,
                "ret_msg": "",
                "conn_id": "fake-conn",
                "req_id": request["req_id"],
                "op": "subscribe",
            })
            .to_string(),
        );
        request
    }

    /// Stop reading: every later `send` and `close` on the client's sink
    /// never completes.
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Whether the client closed its sink.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSink {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let _ = self.sent.send(text);
        Ok(())
    }

    async fn close(&mut self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeStream {
    inbound: mpsc::UnboundedReceiver<Result<RawFrame, TransportError>>,
}

#[async_trait]
impl FrameStream for FakeStream {
    async fn next_frame(&mut self) -> Option<Result<RawFrame, TransportError>> {
        self.inbound.recv().await
    }
}

/// Build a connected transport and its server side.
pub fn fake_transport() -> (Transport, Remote) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let stalled = Arc::new(AtomicBool::new(false));

    let transport = Transport {
        sink: Box::new(FakeSink {
            sent: sent_tx,
            closed: closed.clone(),
            stalled: stalled.clone(),
        }),
        stream: Box::new(FakeStream {
            inbound: inbound_rx,
        }),
    };
    let remote = Remote {
        sent: sent_rx,
        inbound: Some(inbound_tx),
        closed,
        stalled,
    };
    (transport, remote)
}

/// Connector that hands out scripted transports and refuses once the
/// script runs out.
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<VecDeque<Transport>>,
    opens: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    /// Connector that refuses every attempt.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a transport for the next successful open; returns its server side.
    pub fn accept_next(&self) -> Remote {
        let (transport, remote) = fake_transport();
        self.script.lock().push_back(transport);
        remote
    }

    /// Times at which `open` was called.
    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _url: &str) -> Result<Transport, TransportError> {
        self.opens.lock().push(Instant::now());
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::ConnectFailed("connection refused".to_string()))
    }
}

/// Order book snapshot frame for `symbol`.
pub fn snapshot(symbol: &str, update_id: u64) -> String {
    serde_json::json!({
        "topic": format!("orderbook.1.{symbol}"),
        "type": "snapshot",
        "ts": 1_672_304_484_978_u64,
        "data": {
            "s": symbol,
            "b": [["16493.50", "0.006"]],
            "a": [["16611.00", "0.029"]],
            "u": update_id,
            "seq": 7_961_638_724_u64 + update_id,
        },
        "cts": 1_672_304_484_976_u64,
    })
    .to_string()
}

/// Order book delta frame for `symbol`.
pub fn delta(symbol: &str, update_id: u64) -> String {
    serde_json::json!({
        "topic": format!("orderbook.1.{symbol}"),
        "type": "delta",
        "ts": 1_672_304_485_000_u64,
        "data": {
            "s": symbol,
            "b": [["16493.00", "0"]],
            "a": [["16611.50", "1.5"]],
            "u": update_id,
            "seq": 7_961_638_724_u64 + update_id,
        },
    })
    .to_string()
}
