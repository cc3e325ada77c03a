#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Bybit Book Stream - Order Book Feed Client
//!
//! Keeps a supervised connection to Bybit's public v5 WebSocket stream,
//! subscribes to order book topics, and turns snapshot/delta frames into
//! normalized updates.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Connection lifecycle, subscriptions, order book types
//!   - `connection`: State machine and termination reasons
//!   - `subscription`: Topic tracking and subscribe-ack correlation
//!   - `orderbook`: Normalized price levels and updates
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport traits (`Connector`, `FrameSink`, `FrameStream`)
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bybit`: Codec, heartbeat, reconnect policy, router and client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OTLP export
//!
//! # Data Flow
//!
//! ```text
//! Bybit WS ──► WsConnector ──► MessageRouter ──► StreamEvent ──► consumer
//!                  ▲                │
//!                  └── ping/pong ◄──┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core stream types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, StateHandle, Termination};
pub use domain::orderbook::{BookUpdateKind, OrderBookUpdate, PriceLevel};
pub use domain::subscription::{SubscribeOutcome, SubscriptionManager, TopicStatus};

// Ports
pub use application::ports::{
    Connector, FrameSink, FrameStream, RawFrame, Transport, TransportError,
};

// Stream client
pub use infrastructure::bybit::{
    HeartbeatConfig, ReconnectConfig, StreamClient, StreamClientError, StreamConfig, StreamEvent,
};

// Infrastructure config
pub use infrastructure::config::{AppConfig, ConfigError, ServerSettings};

// Health server
pub use infrastructure::health::{FeedStatus, HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
