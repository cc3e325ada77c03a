//! Bybit WebSocket Message Types
//!
//! Wire format types for Bybit's v5 public stream.
//!
//! # Control Messages
//! - `{"op":"ping"}` / `{"op":"pong"}`: application-level heartbeat
//! - `{"op":"subscribe","args":[...],"req_id":"..."}`: subscribe request
//! - `{"op":"subscribe","success":true,"ret_msg":"","req_id":"...","conn_id":"..."}`: ack
//!
//! # Data Messages
//! ```json
//! {
//!   "topic": "orderbook.50.BTCUSDT",
//!   "type": "snapshot",
//!   "ts": 1672304484978,
//!   "data": {"s": "BTCUSDT", "b": [["16493.50", "0.006"]], "a": [["16611.00", "0.029"]], "u": 18521288, "seq": 7961638724}
//! }
//! ```
//!
//! # References
//!
//! - [WebSocket Connect](https://bybit-exchange.github.io/docs/v5/ws/connect)
//! - [Orderbook](https://bybit-exchange.github.io/docs/v5/websocket/public/orderbook)

use serde::{Deserialize, Serialize};

use crate::domain::subscription::SubscribeRequest;

// =============================================================================
// Outbound
// =============================================================================

/// Frames this client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Heartbeat ping.
    Ping,
    /// Reply to a server ping.
    Pong,
    /// Subscribe request.
    Subscribe {
        /// Topics to subscribe to.
        args: Vec<String>,
        /// Correlation id echoed in the ack.
        req_id: String,
    },
}

impl OutboundFrame {
    /// Short name for logs and metrics.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Subscribe { .. } => "subscribe",
        }
    }
}

impl From<SubscribeRequest> for OutboundFrame {
    fn from(request: SubscribeRequest) -> Self {
        Self::Subscribe {
            args: request.topics,
            req_id: request.req_id,
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Connection management message.
    Control(ControlFrame),
    /// Market data message.
    Data(DataFrame),
}

/// Control frame subtypes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Server-initiated ping; must be answered with a pong.
    Ping,
    /// Reply to one of our pings.
    Pong,
    /// Result of a subscribe request.
    SubscribeAck(SubscribeAck),
}

/// Subscribe acknowledgment.
///
/// # Wire Format (JSON)
/// ```json
/// {"success": true, "ret_msg": "", "conn_id": "cejreaspqfh3sjdnldmg-p", "req_id": "1", "op": "subscribe"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribeAck {
    /// Whether the request succeeded. Absent means failure.
    #[serde(default)]
    pub success: bool,
    /// Exchange message (empty on success).
    #[serde(default)]
    pub ret_msg: Option<String>,
    /// Correlation id of the request.
    #[serde(default)]
    pub req_id: Option<String>,
    /// Server connection id.
    #[serde(default)]
    pub conn_id: Option<String>,
}

impl SubscribeAck {
    /// Correlation id, treating an empty string as absent.
    #[must_use]
    pub fn req_id(&self) -> Option<&str> {
        self.req_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Exchange message, treating an empty string as absent.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.ret_msg.as_deref().filter(|msg| !msg.is_empty())
    }
}

/// Control envelope fields used for classification.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ControlEnvelope {
    /// Operation name.
    pub op: String,
    /// Message text; Bybit spot answers `ping` with `ret_msg: "pong"`.
    #[serde(default)]
    pub ret_msg: Option<String>,
}

/// Market data frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataFrame {
    /// Topic name.
    pub topic: String,
    /// `snapshot` or `delta`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Server send time, epoch milliseconds.
    #[serde(default)]
    pub ts: Option<i64>,
    /// Topic payload.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serialization() {
        assert_eq!(
            serde_json::to_string(&OutboundFrame::Ping).unwrap(),
            r#"{"op":"ping"}"#
        );
        assert_eq!(
            serde_json::to_string(&OutboundFrame::Pong).unwrap(),
            r#"{"op":"pong"}"#
        );
    }

    #[test]
    fn subscribe_serialization() {
        let frame = OutboundFrame::from(SubscribeRequest {
            req_id: "abc".to_string(),
            topics: vec!["orderbook.1.BTCUSDT".to_string()],
        });
        assert_eq!(frame.op(), "subscribe");
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"op":"subscribe","args":["orderbook.1.BTCUSDT"],"req_id":"abc"}"#
        );
    }

    #[test]
    fn ack_empty_fields_are_absent() {
        let ack: SubscribeAck = serde_json::from_str(
            r#"{"success":true,"ret_msg":"","conn_id":"c1","req_id":"","op":"subscribe"}"#,
        )
        .unwrap();
        assert!(ack.success);
        assert_eq!(ack.req_id(), None);
        assert_eq!(ack.message(), None);
        assert_eq!(ack.conn_id.as_deref(), Some("c1"));
    }

    #[test]
    fn ack_missing_success_is_failure() {
        let ack: SubscribeAck =
            serde_json::from_str(r#"{"op":"subscribe","req_id":"r1","ret_msg":"error"}"#).unwrap();
        assert!(!ack.success);
        assert_eq!(ack.req_id(), Some("r1"));
        assert_eq!(ack.message(), Some("error"));
    }

    #[test]
    fn data_frame_deserialization() {
        let frame: DataFrame = serde_json::from_str(
            r#"{"topic":"orderbook.1.BTCUSDT","type":"delta","ts":1672304484978,"cts":1672304484976,"data":{"s":"BTCUSDT"}}"#,
        )
        .unwrap();
        assert_eq!(frame.topic, "orderbook.1.BTCUSDT");
        assert_eq!(frame.kind.as_deref(), Some("delta"));
        assert_eq!(frame.ts, Some(1_672_304_484_978));
        assert!(frame.data.is_some());
    }
}
