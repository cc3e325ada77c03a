//! Subscription Management Types
//!
//! Tracks the topics a client wants and what the exchange said about them.
//!
//! # Design
//!
//! The desired topic set is fixed before connecting and re-asserted in full
//! every time a connection enters the subscribing phase. Each request gets a
//! fresh correlation id; acks are matched back to the topics that request
//! carried. Acks never influence the connection state: a rejected topic is
//! reported and the stream carries on with the rest.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

// =============================================================================
// Types
// =============================================================================

/// A topic name (e.g. `orderbook.50.BTCUSDT`).
pub type Topic = String;

/// Latest known state of a topic subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum TopicStatus {
    /// Not requested on the current connection.
    Unsent,
    /// Requested, no ack yet.
    Pending,
    /// Acknowledged by the exchange.
    Active,
    /// Rejected by the exchange.
    Rejected(String),
}

/// A subscribe request ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Correlation id echoed back in the ack.
    pub req_id: String,
    /// Topics carried by this request.
    pub topics: Vec<Topic>,
}

/// Result of applying a subscribe ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeOutcome {
    /// Correlation id from the ack, if any.
    pub req_id: Option<String>,
    /// Topics the ack applied to (empty if the request was unknown).
    pub topics: Vec<Topic>,
    /// Whether the exchange accepted the request.
    pub success: bool,
    /// Exchange message, if any.
    pub message: Option<String>,
}

impl SubscribeOutcome {
    /// Whether the ack matched a request issued on this connection.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !self.topics.is_empty()
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Owns the desired topic set and per-topic ack state.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Topics in insertion order.
    topics: Vec<Topic>,
    /// Membership index for `topics`.
    index: HashSet<Topic>,
    /// Latest status per topic.
    status: HashMap<Topic, TopicStatus>,
    /// Outstanding requests on the current connection, by correlation id.
    in_flight: HashMap<String, Vec<Topic>>,
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager with an initial topic list.
    #[must_use]
    pub fn with_topics(topics: impl IntoIterator<Item = impl Into<Topic>>) -> Self {
        let mut manager = Self::new();
        for topic in topics {
            manager.add(topic);
        }
        manager
    }

    /// Add a topic. Returns `false` if it was already present.
    pub fn add(&mut self, topic: impl Into<Topic>) -> bool {
        let topic = topic.into();
        if !self.index.insert(topic.clone()) {
            return false;
        }
        self.status.insert(topic.clone(), TopicStatus::Unsent);
        self.topics.push(topic);
        true
    }

    /// Build a subscribe request covering every desired topic.
    ///
    /// Requests issued on an earlier connection are forgotten; acks for them
    /// no longer change topic status.
    pub fn build_subscribe_request(&mut self) -> SubscribeRequest {
        let req_id = Uuid::new_v4().to_string();

        self.in_flight.clear();
        for topic in &self.topics {
            self.status.insert(topic.clone(), TopicStatus::Pending);
        }
        self.in_flight.insert(req_id.clone(), self.topics.clone());

        SubscribeRequest {
            req_id,
            topics: self.topics.clone(),
        }
    }

    /// Record a subscribe ack.
    pub fn on_ack(
        &mut self,
        req_id: Option<&str>,
        success: bool,
        message: Option<&str>,
    ) -> SubscribeOutcome {
        let topics = req_id
            .and_then(|id| self.in_flight.remove(id))
            .unwrap_or_default();

        for topic in &topics {
            let next = if success {
                TopicStatus::Active
            } else {
                TopicStatus::Rejected(message.unwrap_or("unknown error").to_string())
            };
            self.status.insert(topic.clone(), next);
        }

        SubscribeOutcome {
            req_id: req_id.map(str::to_string),
            topics,
            success,
            message: message.map(str::to_string),
        }
    }

    /// Forget per-connection state after a disconnect.
    pub fn on_disconnect(&mut self) {
        self.in_flight.clear();
        for topic in &self.topics {
            self.status.insert(topic.clone(), TopicStatus::Unsent);
        }
    }

    /// Whether data for `topic` should be delivered.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.index.contains(topic)
    }

    /// Latest status of a topic.
    #[must_use]
    pub fn status(&self, topic: &str) -> Option<&TopicStatus> {
        self.status.get(topic)
    }
}
