//! Domain Layer - Core stream types and business logic.
//!
//! Pure types for the connection lifecycle, subscriptions and normalized
//! order book updates. Nothing here touches the network.

/// Connection state machine.
pub mod connection;

/// Normalized order book updates.
pub mod orderbook;

/// Subscription tracking and management.
pub mod subscription;
