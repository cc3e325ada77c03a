//! WebSocket Transport
//!
//! [`Connector`] implementation over `tokio-tungstenite`. Protocol-level
//! ping/pong frames are answered by tungstenite and never surface as
//! [`RawFrame`]s; only text and binary payloads reach the router.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    Connector, FrameSink, FrameStream, RawFrame, Transport, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections (`ws://` or `wss://`).
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Transport, TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        Ok(Transport {
            sink: Box::new(WsSink {
                write,
                closed: false,
            }),
            stream: Box::new(WsReader { read }),
        })
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.write.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "Close frame not sent");
        }
        if let Err(e) = self.write.close().await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}

struct WsReader {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsReader {
    async fn next_frame(&mut self) -> Option<Result<RawFrame, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(RawFrame::Text(text.as_str().to_owned())));
                }
                Ok(Message::Binary(bytes)) => return Some(Ok(RawFrame::Binary(bytes.to_vec()))),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    let reason = frame.map_or_else(
                        || "no close frame".to_string(),
                        |f| format!("code {} {}", u16::from(f.code), f.reason.as_str()),
                    );
                    return Some(Err(TransportError::RemoteClosed(reason)));
                }
                Err(e) => return Some(Err(map_ws_error(e))),
            }
        }
    }
}

fn map_ws_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed => {
            TransportError::RemoteClosed("connection closed".to_string())
        }
        tungstenite::Error::AlreadyClosed => TransportError::Closed,
        other => TransportError::Io(other.to_string()),
    }
}
