//! Bybit WebSocket Client Module
//!
//! Client for Bybit's v5 public stream, subscribing to order book topics and
//! emitting normalized updates.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      StreamClient                         │
//! │                                                           │
//! │  supervisor task                                          │
//! │   ├─ ReconnectPolicy (linear backoff, bounded attempts)   │
//! │   └─ session loop (single writer)                         │
//! │        ├─ HeartbeatManager task -> SendPing / Timeout     │
//! │        └─ MessageRouter                                   │
//! │             ├─ JsonCodec (op / topic classification)      │
//! │             ├─ SubscriptionManager (ack correlation)      │
//! │             └─ OrderBookNormalizer                        │
//! └───────────────────────────────────────────────────────────┘
//!                 │ StreamEvent (unbounded, in wire order)
//!                 ▼
//!             consumer
//! ```

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod normalizer;
pub mod reconnect;
pub mod router;
pub mod transport;

pub use client::{
    BYBIT_SPOT_URL, DEFAULT_TOPIC, StreamClient, StreamClientError, StreamConfig, StreamEvent,
};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatState};
pub use messages::{ControlFrame, DataFrame, InboundFrame, OutboundFrame, SubscribeAck};
pub use normalizer::{NormalizeError, OrderBookNormalizer};
pub use reconnect::{BackoffStrategy, ReconnectConfig, ReconnectPolicy};
pub use router::{DropReason, MessageRouter, Routed};
pub use transport::WsConnector;
