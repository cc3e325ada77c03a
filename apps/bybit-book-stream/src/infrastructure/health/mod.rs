//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready while the stream is live)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::connection::{ConnectionState, Termination};
use crate::infrastructure::bybit::StreamEvent;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Feed Status
// =============================================================================

/// Stream status shared between the event loop and the health server.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
    last_live_at: RwLock<Option<DateTime<Utc>>>,
    last_update_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    termination: RwLock<Option<Termination>>,
    reconnect_attempt: AtomicU32,
    active_topics: AtomicUsize,
    updates_received: AtomicU64,
}

impl FeedStatus {
    /// Create a status in the disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a stream event into the status.
    pub fn apply(&self, event: &StreamEvent) {
        match event {
            StreamEvent::StateChanged(state) => {
                *self.state.write() = *state;
                match state {
                    ConnectionState::Live => {
                        *self.last_live_at.write() = Some(Utc::now());
                        *self.last_error.write() = None;
                        self.reconnect_attempt.store(0, Ordering::Relaxed);
                    }
                    ConnectionState::Disconnected => {
                        self.active_topics.store(0, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
            StreamEvent::Disconnected { reason } => {
                *self.last_error.write() = Some(reason.clone());
            }
            StreamEvent::Reconnecting { attempt, .. } => {
                self.reconnect_attempt.store(*attempt, Ordering::Relaxed);
            }
            StreamEvent::Subscribed(outcome) => {
                self.active_topics
                    .fetch_add(outcome.topics.len(), Ordering::Relaxed);
            }
            StreamEvent::SubscribeFailed(outcome) => {
                *self.last_error.write() = Some(
                    outcome
                        .message
                        .clone()
                        .unwrap_or_else(|| "subscribe failed".to_string()),
                );
            }
            StreamEvent::OrderBook(_) => {
                self.updates_received.fetch_add(1, Ordering::Relaxed);
                *self.last_update_at.write() = Some(Utc::now());
            }
            StreamEvent::Terminated(termination) => {
                *self.termination.write() = Some(*termination);
            }
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Order book updates received so far.
    #[must_use]
    pub fn updates_received(&self) -> u64 {
        self.updates_received.load(Ordering::Relaxed)
    }

    /// Termination reason, once the client has stopped.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        *self.termination.read()
    }

    fn snapshot(&self) -> FeedInfo {
        let state = self.state();
        FeedInfo {
            state,
            live: state == ConnectionState::Live,
            reconnect_attempt: self.reconnect_attempt.load(Ordering::Relaxed),
            active_topics: self.active_topics.load(Ordering::Relaxed),
            updates_received: self.updates_received(),
            last_live_at: *self.last_live_at.read(),
            last_update_at: *self.last_update_at.read(),
            last_error: self.last_error.read().clone(),
            termination: self.termination(),
        }
    }
}

/// Shared feed status.
pub type SharedFeedStatus = Arc<FeedStatus>;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream status.
    pub feed: FeedInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream is live.
    Healthy,
    /// Stream is connecting or resubscribing.
    Degraded,
    /// Stream is down or stopped.
    Unhealthy,
}

/// Stream status as reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the stream is live.
    pub live: bool,
    /// Current reconnect attempt (0 while live).
    pub reconnect_attempt: u32,
    /// Topics confirmed on the current connection.
    pub active_topics: usize,
    /// Order book updates received.
    pub updates_received: u64,
    /// When the stream last went live.
    pub last_live_at: Option<DateTime<Utc>>,
    /// When the last update arrived.
    pub last_update_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_error: Option<String>,
    /// Why the client stopped, if it has.
    pub termination: Option<Termination>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: SharedFeedStatus,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, feed: SharedFeedStatus) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.state() == ConnectionState::Live {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = state.feed.snapshot();
    HealthResponse {
        status: determine_health_status(&feed),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
    }
}

fn determine_health_status(feed: &FeedInfo) -> HealthStatus {
    if feed.termination.is_some() {
        return HealthStatus::Unhealthy;
    }
    match feed.state {
        ConnectionState::Live => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Subscribing => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Closing => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
