//! Application Layer - Port definitions.
//!
//! Interfaces that decouple the stream supervisor from the concrete
//! network adapter.

/// Port interfaces for external systems (transport).
pub mod ports;
