//! Bybit Book Stream Binary
//!
//! Streams order book updates from Bybit's public WebSocket and serves
//! health and metrics over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bybit-book-stream
//! ```
//!
//! # Environment Variables
//!
//! - `BYBIT_WS_URL`: Stream URL (default: `wss://stream.bybit.com/v5/public/spot`)
//! - `BYBIT_TOPICS`: Comma-separated topics (default: `orderbook.1.BTCUSDT`)
//! - `STREAM_PING_INTERVAL_SECS`: Heartbeat interval (default: 15)
//! - `STREAM_PING_TIMEOUT_SECS`: Pong timeout (default: 10)
//! - `STREAM_RECONNECT_BASE_SECS`: Linear backoff step (default: 5)
//! - `STREAM_MAX_RECONNECT_ATTEMPTS`: Reconnects before giving up (default: 5)
//! - `STREAM_CONNECT_TIMEOUT_SECS`: Connect timeout (default: 10)
//! - `STREAM_BOOK_DEPTH`: Levels kept per side, 0 for all (default: 0)
//! - `STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry span export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log filter (default: `bybit_book_stream=info`)

use std::sync::Arc;

use anyhow::Context;
use bybit_book_stream::infrastructure::health::{FeedStatus, HealthServer, HealthServerState};
use bybit_book_stream::infrastructure::telemetry;
use bybit_book_stream::{AppConfig, StreamClient, StreamEvent, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv_from_ancestors();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Bybit book stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
    }

    let config = AppConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Health server
    let feed = Arc::new(FeedStatus::new());
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Stream client
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let client = StreamClient::new(config.stream, event_tx).context("invalid stream config")?;
    let events = tokio::spawn(handle_events(event_rx, Arc::clone(&feed)));
    client.start().await;

    tokio::select! {
        () = await_shutdown() => {}
        _ = events => {
            tracing::warn!("Stream client stopped on its own");
        }
    }

    let termination = client.close().await;
    tracing::info!(?termination, "Stream client closed");

    shutdown_token.cancel();
    if let Err(e) = health_task.await {
        tracing::warn!(error = %e, "Health server task failed");
    }

    tracing::info!("Bybit book stream stopped");
    Ok(())
}

/// Log stream events and fold them into the feed status.
///
/// Returns once the client reports a termination.
async fn handle_events(mut rx: mpsc::UnboundedReceiver<StreamEvent>, feed: Arc<FeedStatus>) {
    while let Some(event) = rx.recv().await {
        feed.apply(&event);
        match &event {
            StreamEvent::StateChanged(state) => {
                tracing::debug!(state = %state, "Connection state changed");
            }
            StreamEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Stream disconnected");
            }
            StreamEvent::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_secs = delay.as_secs_f64(), "Stream reconnecting");
            }
            StreamEvent::Subscribed(outcome) => {
                tracing::info!(topics = ?outcome.topics, "Subscribed");
            }
            StreamEvent::SubscribeFailed(outcome) => {
                tracing::error!(
                    topics = ?outcome.topics,
                    message = ?outcome.message,
                    "Subscription rejected"
                );
            }
            StreamEvent::OrderBook(update) => {
                tracing::info!(
                    symbol = %update.symbol,
                    kind = ?update.kind,
                    update_id = ?update.update_id,
                    best_bid = ?update.best_bid().map(|l| l.price),
                    best_ask = ?update.best_ask().map(|l| l.price),
                    "Order book update"
                );
            }
            StreamEvent::Terminated(termination) => {
                tracing::info!(?termination, "Stream terminated");
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        url = %config.stream.url,
        topics = ?config.stream.topics,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ping_interval_secs = config.stream.heartbeat.ping_interval.as_secs(),
        pong_timeout_secs = config.stream.heartbeat.pong_timeout.as_secs(),
        reconnect_base_secs = config.stream.reconnect.base_interval.as_secs(),
        max_reconnect_attempts = config.stream.reconnect.max_attempts,
        "Stream timing"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
