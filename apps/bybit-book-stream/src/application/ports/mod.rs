//! Port Interfaces
//!
//! Contracts between the stream supervisor and the network. The supervisor
//! only ever talks to these traits, so the WebSocket adapter can be swapped
//! for a scripted transport in tests.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Connector`]: opens a transport to a URL
//! - [`FrameSink`]: write half, owned by the session loop (single writer)
//! - [`FrameStream`]: read half, consumed by the session loop in wire order

use async_trait::async_trait;

/// A raw inbound frame, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Frame payload as text, if it is valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors surfaced by a transport. All are terminal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// DNS, TCP, TLS or WebSocket handshake failure.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Open did not complete in time.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// I/O error on an open connection.
    #[error("I/O error: {0}")]
    Io(String),

    /// The remote closed the connection.
    #[error("connection closed by remote: {0}")]
    RemoteClosed(String),

    /// Write attempted after the connection was closed.
    #[error("connection already closed")]
    Closed,
}

/// Opened transport, split into its halves.
pub struct Transport {
    /// Write half.
    pub sink: Box<dyn FrameSink>,
    /// Read half.
    pub stream: Box<dyn FrameStream>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    async fn open(&self, url: &str) -> Result<Transport, TransportError>;
}

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Read half of a transport.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame. `None` means the stream ended; an error ends it too.
    async fn next_frame(&mut self) -> Option<Result<RawFrame, TransportError>>;
}
