//! Order Book Normalizer
//!
//! Turns a Bybit `orderbook.*` data frame into an [`OrderBookUpdate`].
//!
//! Levels arrive as `[price, size]` pairs of decimal strings. A level that is
//! too short, not numeric, or has a non-positive price (or negative size) is
//! skipped and counted; it never fails the whole update.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::messages::DataFrame;
use crate::domain::orderbook::{
    BookTopic, BookUpdateKind, OrderBookUpdate, PriceLevel, sort_asks, sort_bids,
};

/// Reasons a data frame cannot be turned into an update at all.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The frame has no `data` payload.
    #[error("data frame has no payload")]
    MissingPayload,

    /// The payload is not a JSON object.
    #[error("payload is not an object")]
    InvalidPayload,

    /// No symbol in the payload or topic name.
    #[error("cannot determine symbol for topic {0}")]
    MissingSymbol(String),
}

/// Converts raw order book frames into normalized updates.
#[derive(Debug, Clone, Default)]
pub struct OrderBookNormalizer {
    depth: Option<usize>,
}

impl OrderBookNormalizer {
    /// Normalizer that keeps every level.
    #[must_use]
    pub const fn new() -> Self {
        Self { depth: None }
    }

    /// Normalizer that keeps at most `depth` levels per side.
    #[must_use]
    pub const fn with_depth(depth: usize) -> Self {
        Self { depth: Some(depth) }
    }

    /// Normalize one data frame.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is missing, is not an object, or
    /// carries no recognizable symbol.
    pub fn normalize(&self, frame: &DataFrame) -> Result<OrderBookUpdate, NormalizeError> {
        let payload = frame
            .data
            .as_ref()
            .ok_or(NormalizeError::MissingPayload)?
            .as_object()
            .ok_or(NormalizeError::InvalidPayload)?;

        let symbol = payload
            .get("s")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| BookTopic::parse(&frame.topic).map(|topic| topic.symbol))
            .ok_or_else(|| NormalizeError::MissingSymbol(frame.topic.clone()))?;

        let mut skipped = 0;
        let mut bids = parse_side(&frame.topic, payload, "b", &mut skipped);
        let mut asks = parse_side(&frame.topic, payload, "a", &mut skipped);
        sort_bids(&mut bids);
        sort_asks(&mut asks);

        if let Some(depth) = self.depth {
            bids.truncate(depth);
            asks.truncate(depth);
        }

        if skipped > 0 {
            tracing::warn!(
                topic = %frame.topic,
                skipped,
                "Skipped malformed order book levels"
            );
        }

        Ok(OrderBookUpdate {
            topic: frame.topic.clone(),
            symbol,
            update_id: payload.get("u").and_then(as_u64),
            sequence: payload.get("seq").and_then(as_u64),
            timestamp: payload
                .get("ts")
                .and_then(Value::as_i64)
                .or(frame.ts)
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            kind: frame.kind.as_deref().and_then(BookUpdateKind::from_wire),
            bids,
            asks,
            skipped_levels: skipped,
        })
    }
}

fn parse_side(
    topic: &str,
    payload: &Map<String, Value>,
    key: &str,
    skipped: &mut usize,
) -> Vec<PriceLevel> {
    match payload.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(levels)) => levels
            .iter()
            .filter_map(|raw| {
                let level = parse_level(raw);
                if level.is_none() {
                    tracing::debug!(topic, side = key, level = %raw, "Invalid price level");
                    *skipped += 1;
                }
                level
            })
            .collect(),
        Some(other) => {
            tracing::warn!(topic, side = key, value = %other, "Order book side is not an array");
            *skipped += 1;
            Vec::new()
        }
    }
}

fn parse_level(raw: &Value) -> Option<PriceLevel> {
    let pair = raw.as_array().filter(|pair| pair.len() >= 2)?;
    let price = parse_decimal(&pair[0])?;
    let size = parse_decimal(&pair[1])?;
    (price > Decimal::ZERO && size >= Decimal::ZERO).then(|| PriceLevel::new(price, size))
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
