//! Message Router
//!
//! Classifies each inbound frame and decides what the session loop does
//! with it. Routing is synchronous and never writes to the socket: replies
//! come back as [`Routed::Reply`] so the session loop stays the only writer.

use std::sync::Arc;
use std::time::Instant;

use super::codec::{CodecError, JsonCodec, preview};
use super::heartbeat::HeartbeatState;
use super::messages::{ControlFrame, DataFrame, InboundFrame, OutboundFrame};
use super::normalizer::OrderBookNormalizer;
use crate::application::ports::RawFrame;
use crate::domain::orderbook::OrderBookUpdate;
use crate::domain::subscription::{SubscribeOutcome, SubscriptionManager};
use crate::infrastructure::metrics::{self, FrameKind};

/// What to do with an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Send this frame back (pong for a server ping).
    Reply(OutboundFrame),
    /// Pong for our heartbeat. `cleared` is false if no ping was outstanding.
    PongReceived {
        /// Whether an outstanding ping was cleared.
        cleared: bool,
    },
    /// Subscribe ack, already applied to the subscription manager.
    Subscription(SubscribeOutcome),
    /// Normalized order book update for a subscribed topic.
    Update(OrderBookUpdate),
    /// Frame was discarded.
    Dropped(DropReason),
}

/// Why a frame was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Not decodable or not classifiable.
    Undecodable(String),
    /// Data for a topic this client never asked for.
    Unsubscribed(String),
    /// Order book payload with no usable content.
    Unusable(String),
}

impl DropReason {
    /// Short label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Undecodable(_) => "undecodable",
            Self::Unsubscribed(_) => "unsubscribed",
            Self::Unusable(_) => "unusable",
        }
    }
}

/// Routes decoded frames for one connection.
#[derive(Debug)]
pub struct MessageRouter {
    codec: JsonCodec,
    normalizer: OrderBookNormalizer,
    heartbeat: Arc<HeartbeatState>,
}

impl MessageRouter {
    /// Create a router sharing the connection's heartbeat state.
    #[must_use]
    pub const fn new(normalizer: OrderBookNormalizer, heartbeat: Arc<HeartbeatState>) -> Self {
        Self {
            codec: JsonCodec::new(),
            normalizer,
            heartbeat,
        }
    }

    /// Route one frame.
    pub fn route(&self, frame: &RawFrame, subscriptions: &mut SubscriptionManager) -> Routed {
        let start = Instant::now();

        let decoded = match frame {
            RawFrame::Text(text) => self.codec.decode(text),
            RawFrame::Binary(bytes) => self.codec.decode_binary(bytes),
        };

        let (kind, routed) = match decoded {
            Ok(InboundFrame::Control(control)) => self.route_control(control, subscriptions),
            Ok(InboundFrame::Data(data)) => {
                if subscriptions.is_subscribed(&data.topic) {
                    (FrameKind::Data, self.route_data(&data))
                } else {
                    tracing::debug!(topic = %data.topic, "Dropping data for unsubscribed topic");
                    (FrameKind::Data, Routed::Dropped(DropReason::Unsubscribed(data.topic)))
                }
            }
            Err(e) => {
                metrics::record_decode_error(e.kind());
                self.log_undecodable(frame, &e);
                (FrameKind::Unknown, Routed::Dropped(DropReason::Undecodable(e.to_string())))
            }
        };

        metrics::record_frame_received(kind);
        if let Routed::Dropped(reason) = &routed {
            metrics::record_frame_dropped(reason.as_str());
        }
        metrics::record_processing_duration(kind, start.elapsed());

        routed
    }

    fn route_control(
        &self,
        control: ControlFrame,
        subscriptions: &mut SubscriptionManager,
    ) -> (FrameKind, Routed) {
        match control {
            ControlFrame::Ping => {
                tracing::debug!("Received ping, replying with pong");
                (FrameKind::Ping, Routed::Reply(OutboundFrame::Pong))
            }
            ControlFrame::Pong => {
                let cleared = self.heartbeat.record_pong();
                if !cleared {
                    tracing::debug!("Received pong with no ping outstanding");
                }
                (FrameKind::Pong, Routed::PongReceived { cleared })
            }
            ControlFrame::SubscribeAck(ack) => {
                let outcome = subscriptions.on_ack(ack.req_id(), ack.success, ack.message());
                if !outcome.is_known() {
                    tracing::debug!(
                        req_id = ?outcome.req_id,
                        "Subscribe ack does not match an in-flight request"
                    );
                }
                metrics::record_subscribe_ack(outcome.success);
                (FrameKind::SubscribeAck, Routed::Subscription(outcome))
            }
        }
    }

    fn route_data(&self, data: &DataFrame) -> Routed {
        match self.normalizer.normalize(data) {
            Ok(update) => {
                if update.skipped_levels > 0 {
                    metrics::record_levels_skipped(update.skipped_levels);
                }
                Routed::Update(update)
            }
            Err(e) => {
                tracing::warn!(topic = %data.topic, error = %e, "Dropping unusable order book frame");
                Routed::Dropped(DropReason::Unusable(e.to_string()))
            }
        }
    }

    fn log_undecodable(&self, frame: &RawFrame, error: &CodecError) {
        match error {
            CodecError::UnknownOp(op) => {
                tracing::debug!(op = %op, "Ignoring frame with unhandled op");
            }
            _ => {
                tracing::warn!(
                    error = %error,
                    len = frame.len(),
                    frame = frame.as_text().map_or("<binary>", preview),
                    "Dropping undecodable frame"
                );
            }
        }
    }
}
