//! Order Book Types
//!
//! Canonical, codec-agnostic representation of an order book update as
//! handed to downstream consumers. Each update stands alone: no book state
//! is cached or reconstructed from deltas.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Quantity resting at the price. Zero in a delta removes the level.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new level.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Whether an update carries the full book or a change to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookUpdateKind {
    /// Full book state.
    Snapshot,
    /// Incremental change.
    Delta,
}

impl BookUpdateKind {
    /// Parse the wire `type` field.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "snapshot" => Some(Self::Snapshot),
            "delta" => Some(Self::Delta),
            _ => None,
        }
    }
}

/// Normalized order book update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    /// Topic the update arrived on (e.g. `orderbook.1.BTCUSDT`).
    pub topic: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Exchange update id, if provided.
    pub update_id: Option<u64>,
    /// Cross-sequence number, if provided.
    pub sequence: Option<u64>,
    /// Exchange timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Snapshot or delta, if the wire format says.
    pub kind: Option<BookUpdateKind>,
    /// Bid levels, best (highest) price first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best (lowest) price first.
    pub asks: Vec<PriceLevel>,
    /// Levels dropped because they were malformed.
    pub skipped_levels: usize,
}

impl OrderBookUpdate {
    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Whether the update carries no levels at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Whether this is a full snapshot.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.kind == Some(BookUpdateKind::Snapshot)
    }
}

/// Order bids best-first (descending price). Stable for equal prices.
pub fn sort_bids(levels: &mut [PriceLevel]) {
    levels.sort_by_key(|level| Reverse(level.price));
}

/// Order asks best-first (ascending price). Stable for equal prices.
pub fn sort_asks(levels: &mut [PriceLevel]) {
    levels.sort_by_key(|level| level.price);
}

/// Parsed `orderbook.{depth}.{symbol}` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookTopic {
    /// Requested book depth.
    pub depth: u32,
    /// Instrument symbol.
    pub symbol: String,
}

impl BookTopic {
    /// Parse a topic name. Returns `None` for non order book topics.
    #[must_use]
    pub fn parse(topic: &str) -> Option<Self> {
        let mut parts = topic.splitn(3, '.');
        if parts.next()? != "orderbook" {
            return None;
        }
        let depth = parts.next()?.parse().ok()?;
        let symbol = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            depth,
            symbol: symbol.to_string(),
        })
    }
}
