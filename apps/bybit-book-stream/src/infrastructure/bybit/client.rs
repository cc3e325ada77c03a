//! Bybit Stream Client
//!
//! Supervised connection to Bybit's v5 public WebSocket stream delivering
//! normalized order book updates.
//!
//! # Stream URLs
//!
//! - Spot: `wss://stream.bybit.com/v5/public/spot`
//! - Linear: `wss://stream.bybit.com/v5/public/linear`
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Subscribing -> Live
//!       ^              |              |          |
//!       +--------------+--------------+----------+   (failure, then backoff)
//!
//! close(): Connecting | Subscribing | Live -> Closing -> Disconnected
//! ```
//!
//! A background supervisor task owns the transport. Within a connection the
//! session loop is the only writer: heartbeat pings, pong replies and
//! subscribe requests all go through it. Events reach the consumer in wire
//! order over an unbounded channel, so a slow consumer never stalls the
//! receive loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager, HeartbeatState,
};
use super::messages::OutboundFrame;
use super::normalizer::OrderBookNormalizer;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::router::{MessageRouter, Routed};
use super::transport::WsConnector;
use crate::application::ports::{Connector, FrameSink, RawFrame, Transport, TransportError};
use crate::domain::connection::{ConnectionState, StateHandle, StateMachine, Termination};
use crate::domain::orderbook::OrderBookUpdate;
use crate::domain::subscription::{SubscribeOutcome, SubscriptionManager};
use crate::infrastructure::metrics;

/// Bybit v5 public spot stream.
pub const BYBIT_SPOT_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// Topic subscribed when none is configured.
pub const DEFAULT_TOPIC: &str = "orderbook.1.BTCUSDT";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// Configuration rejected before start.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Heartbeat failure.
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    /// The server ended the stream without an error.
    #[error("stream ended")]
    StreamEnded,
}

// =============================================================================
// Stream Events
// =============================================================================

/// Events emitted by the stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// Connection lost or could not be opened.
    Disconnected {
        /// Failure description.
        reason: String,
    },
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Reconnect attempt number, starting at 1.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Subscribe request acknowledged.
    Subscribed(SubscribeOutcome),
    /// Subscribe request rejected.
    SubscribeFailed(SubscribeOutcome),
    /// Normalized order book update.
    OrderBook(OrderBookUpdate),
    /// The client stopped for good.
    Terminated(Termination),
}

// =============================================================================
// Stream Client Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// WebSocket URL.
    pub url: String,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Per-side level limit on emitted updates.
    pub book_depth: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::bybit_spot([DEFAULT_TOPIC])
    }
}

impl StreamConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(url: impl Into<String>, topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            url: url.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            book_depth: None,
        }
    }

    /// Configuration for the public spot stream.
    #[must_use]
    pub fn bybit_spot(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(BYBIT_SPOT_URL, topics)
    }

    /// Set the heartbeat configuration.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the reconnection configuration.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the connection attempt timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Limit emitted updates to `depth` levels per side.
    #[must_use]
    pub fn with_book_depth(mut self, depth: usize) -> Self {
        self.book_depth = Some(depth);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::InvalidConfig`] describing the first
    /// problem found.
    pub fn validate(&self) -> Result<(), StreamClientError> {
        let invalid = |msg: &str| Err(StreamClientError::InvalidConfig(msg.to_string()));

        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return invalid("url must start with ws:// or wss://");
        }
        if self.topics.is_empty() {
            return invalid("at least one topic is required");
        }
        if self.topics.iter().any(|topic| topic.trim().is_empty()) {
            return invalid("topics must not be empty");
        }
        if self.heartbeat.ping_interval.is_zero() || self.heartbeat.pong_timeout.is_zero() {
            return invalid("heartbeat interval and timeout must be positive");
        }
        if self.connect_timeout.is_zero() {
            return invalid("connect timeout must be positive");
        }
        if self.book_depth == Some(0) {
            return invalid("book depth must be positive");
        }
        if self.reconnect.max_attempts == 0 {
            return invalid("reconnect attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return invalid("jitter factor must be between 0 and 1");
        }
        Ok(())
    }

    fn normalizer(&self) -> OrderBookNormalizer {
        self.book_depth
            .map_or_else(OrderBookNormalizer::new, OrderBookNormalizer::with_depth)
    }
}

// =============================================================================
// Stream Client
// =============================================================================

#[derive(Default)]
struct Lifecycle {
    supervisor: Option<Supervisor>,
    task: Option<JoinHandle<Termination>>,
    finished: Option<Termination>,
}

/// Handle to a supervised Bybit stream.
///
/// # Example
///
/// ```rust,no_run
/// use bybit_book_stream::infrastructure::bybit::{StreamClient, StreamConfig, StreamEvent};
/// use tokio::sync::mpsc;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let (event_tx, mut event_rx) = mpsc::unbounded_channel();
///     let client = StreamClient::new(StreamConfig::default(), event_tx)?;
///     client.start().await;
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             StreamEvent::OrderBook(update) => println!("{:?}", update.best_bid()),
///             StreamEvent::Terminated(_) => break,
///             _ => {}
///         }
///     }
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct StreamClient {
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
    state: StateHandle,
    termination: Arc<RwLock<Option<Termination>>>,
    url: String,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.url)
            .field("state", &self.state.get())
            .field("termination", &*self.termination.read())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client over a real WebSocket connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: StreamConfig,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<Self, StreamClientError> {
        Self::with_connector(config, Arc::new(WsConnector::new()), event_tx)
    }

    /// Create a client over the given connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_connector(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<Self, StreamClientError> {
        config.validate()?;

        let machine = StateMachine::new();
        let state = machine.handle();
        let cancel = CancellationToken::new();
        let termination = Arc::new(RwLock::new(None));
        let url = config.url.clone();

        let supervisor = Supervisor {
            subscriptions: SubscriptionManager::with_topics(config.topics.iter().cloned()),
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            normalizer: config.normalizer(),
            codec: JsonCodec::new(),
            config,
            connector,
            events: event_tx,
            cancel: cancel.clone(),
            machine,
            termination: termination.clone(),
        };

        Ok(Self {
            lifecycle: Mutex::new(Lifecycle {
                supervisor: Some(supervisor),
                ..Lifecycle::default()
            }),
            cancel,
            state,
            termination,
            url,
        })
    }

    /// Start the supervisor.
    ///
    /// Returns `true` if this call started it; later calls, and calls after
    /// [`StreamClient::close`], do nothing.
    pub async fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(supervisor) = lifecycle.supervisor.take() else {
            return false;
        };

        tracing::info!(url = %self.url, "Starting Bybit stream client");
        lifecycle.task = Some(supervisor.spawn());
        true
    }

    /// Stop the client and wait until the transport and background tasks
    /// have fully stopped.
    ///
    /// Idempotent: every call returns the same [`Termination`]. If the
    /// client already gave up on its own, that reason is returned. Pending
    /// writes are abandoned once close is requested.
    pub async fn close(&self) -> Termination {
        self.cancel.cancel();

        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(done) = lifecycle.finished {
            return done;
        }

        let termination = if let Some(task) = lifecycle.task.take() {
            match task.await {
                Ok(termination) => termination,
                Err(e) => {
                    tracing::error!(error = %e, "Stream supervisor watcher failed");
                    Termination::Panicked
                }
            }
        } else if let Some(supervisor) = lifecycle.supervisor.take() {
            supervisor.finish(Termination::Closed)
        } else {
            Termination::Closed
        };

        lifecycle.finished = Some(termination);
        *self.termination.write() = Some(termination);
        termination
    }

    /// Observable connection state.
    #[must_use]
    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Why the client stopped, once it has.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        *self.termination.read()
    }

    /// Stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Supervisor
// =============================================================================

enum SessionEnd {
    Closed,
    Failed(StreamClientError),
}

struct Supervisor {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
    machine: StateMachine,
    subscriptions: SubscriptionManager,
    policy: ReconnectPolicy,
    normalizer: OrderBookNormalizer,
    codec: JsonCodec,
    termination: Arc<RwLock<Option<Termination>>>,
}

impl Supervisor {
    /// Run on a task of its own, watched by a second task that reports a
    /// panic as [`Termination::Panicked`].
    fn spawn(self) -> JoinHandle<Termination> {
        let events = self.events.clone();
        let termination = self.termination.clone();
        let task = tokio::spawn(self.run());

        tokio::spawn(async move {
            match task.await {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "Stream supervisor task failed");
                    *termination.write() = Some(Termination::Panicked);
                    if events
                        .send(StreamEvent::Terminated(Termination::Panicked))
                        .is_err()
                    {
                        tracing::trace!("Event receiver dropped");
                    }
                    Termination::Panicked
                }
            }
        })
    }

    /// Connect, run, and reconnect until closed or out of attempts.
    async fn run(mut self) -> Termination {
        let termination = loop {
            self.set_state(ConnectionState::Connecting);
            tracing::info!(url = %self.config.url, "Connecting to Bybit stream");

            let opened = tokio::select! {
                biased;

                () = self.cancel.cancelled() => None,
                result = tokio::time::timeout(
                    self.config.connect_timeout,
                    self.connector.open(&self.config.url),
                ) => Some(result),
            };

            let error = match opened {
                None => {
                    tracing::info!("Stream client closed while connecting");
                    self.set_state(ConnectionState::Closing);
                    self.set_state(ConnectionState::Disconnected);
                    break Termination::Closed;
                }
                Some(Err(_elapsed)) => {
                    TransportError::ConnectTimeout(self.config.connect_timeout).into()
                }
                Some(Ok(Err(e))) => e.into(),
                Some(Ok(Ok(transport))) => match self.run_session(transport).await {
                    SessionEnd::Closed => break Termination::Closed,
                    SessionEnd::Failed(e) => e,
                },
            };

            if self.machine.current() != ConnectionState::Disconnected {
                self.set_state(ConnectionState::Disconnected);
            }
            tracing::warn!(error = %error, "Bybit stream connection lost");
            self.emit(StreamEvent::Disconnected {
                reason: error.to_string(),
            });

            let Some(delay) = self.policy.next_delay() else {
                let attempts = self.policy.attempt_count();
                tracing::error!(attempts, "Maximum reconnection attempts reached, giving up");
                break Termination::ReconnectExhausted { attempts };
            };

            let attempt = self.policy.attempt_count();
            tracing::info!(
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to Bybit stream"
            );
            metrics::record_reconnect();
            self.emit(StreamEvent::Reconnecting { attempt, delay });

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::info!("Stream client closed during reconnect delay");
                    break Termination::Closed;
                }
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.finish(termination)
    }

    /// Run one connection from subscribe to teardown.
    async fn run_session(&mut self, transport: Transport) -> SessionEnd {
        let Transport { mut sink, mut stream } = transport;
        let cancel = self.cancel.clone();

        self.set_state(ConnectionState::Subscribing);
        let request = self.subscriptions.build_subscribe_request();
        tracing::info!(req_id = %request.req_id, topics = ?request.topics, "Subscribing to topics");

        let subscribe = OutboundFrame::from(request);
        let aborted = match unless_cancelled(&cancel, self.send(sink.as_mut(), &subscribe)).await {
            Some(Ok(())) => None,
            Some(Err(e)) => Some(SessionEnd::Failed(e)),
            None => {
                self.set_state(ConnectionState::Closing);
                Some(SessionEnd::Closed)
            }
        };
        if let Some(end) = aborted {
            self.close_sink(sink.as_mut()).await;
            self.subscriptions.on_disconnect();
            self.set_state(ConnectionState::Disconnected);
            return end;
        }

        self.set_state(ConnectionState::Live);
        self.policy.reset();
        tracing::info!("Bybit stream live");

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = self.cancel.child_token();
        let heartbeat = tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat,
                heartbeat_state.clone(),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let router = MessageRouter::new(self.normalizer.clone(), heartbeat_state);

        let end = loop {
            // Writes race `cancel` as well; a peer that stops reading must
            // not block close().
            let step = tokio::select! {
                biased;

                () = cancel.cancelled() => None,
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        unless_cancelled(&cancel, self.send(sink.as_mut(), &OutboundFrame::Ping))
                            .await
                    }
                    HeartbeatEvent::Timeout { waited } => {
                        metrics::record_heartbeat_timeout();
                        Some(Err(HeartbeatError::Timeout(waited).into()))
                    }
                },
                frame = stream.next_frame() => match frame {
                    Some(Ok(raw)) => {
                        unless_cancelled(&cancel, self.dispatch(&router, &raw, sink.as_mut())).await
                    }
                    Some(Err(e)) => Some(Err(e.into())),
                    None => Some(Err(StreamClientError::StreamEnded)),
                },
            };

            match step {
                None => break SessionEnd::Closed,
                Some(Err(e)) => break SessionEnd::Failed(e),
                Some(Ok(())) => {}
            }
        };

        if matches!(end, SessionEnd::Closed) {
            self.set_state(ConnectionState::Closing);
        }

        heartbeat_cancel.cancel();
        if let Err(e) = heartbeat.await {
            tracing::warn!(error = %e, "Heartbeat task failed");
        }
        self.close_sink(sink.as_mut()).await;
        self.subscriptions.on_disconnect();
        self.set_state(ConnectionState::Disconnected);

        end
    }

    /// Close the write half, giving up after the connect timeout.
    async fn close_sink(&self, sink: &mut dyn FrameSink) {
        let limit = self.config.connect_timeout;
        if tokio::time::timeout(limit, sink.close()).await.is_err() {
            tracing::warn!(
                timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "Transport close timed out, dropping connection"
            );
        }
    }

    /// Act on one inbound frame.
    async fn dispatch(
        &mut self,
        router: &MessageRouter,
        raw: &RawFrame,
        sink: &mut dyn FrameSink,
    ) -> Result<(), StreamClientError> {
        match router.route(raw, &mut self.subscriptions) {
            Routed::Reply(frame) => self.send(sink, &frame).await?,
            Routed::Subscription(outcome) => {
                if outcome.success {
                    tracing::info!(
                        req_id = ?outcome.req_id,
                        topics = ?outcome.topics,
                        "Subscription confirmed"
                    );
                    self.emit(StreamEvent::Subscribed(outcome));
                } else {
                    tracing::error!(
                        req_id = ?outcome.req_id,
                        message = ?outcome.message,
                        "Subscription failed"
                    );
                    self.emit(StreamEvent::SubscribeFailed(outcome));
                }
            }
            Routed::Update(update) => {
                metrics::record_update_emitted(&update.symbol);
                self.emit(StreamEvent::OrderBook(update));
            }
            Routed::PongReceived { .. } | Routed::Dropped(_) => {}
        }
        Ok(())
    }

    async fn send(
        &self,
        sink: &mut dyn FrameSink,
        frame: &OutboundFrame,
    ) -> Result<(), StreamClientError> {
        let text = self.codec.encode(frame)?;
        tracing::trace!(op = frame.op(), "Sending frame");
        sink.send(text).await?;
        Ok(())
    }

    fn set_state(&self, next: ConnectionState) {
        match self.machine.transition(next) {
            Ok(_) => {
                metrics::set_connection_state(next);
                self.emit(StreamEvent::StateChanged(next));
            }
            Err(e) => tracing::error!(error = %e, "Rejected connection state change"),
        }
    }

    fn emit(&self, event: StreamEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }

    fn finish(self, termination: Termination) -> Termination {
        tracing::info!(?termination, "Bybit stream client stopped");
        *self.termination.write() = Some(termination);
        self.emit(StreamEvent::Terminated(termination));
        termination
    }
}

/// Run `fut` unless `cancel` fires first, in which case `None`.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;

        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
