//! Heartbeat Manager
//!
//! Keeps a live connection honest with application-level `{"op":"ping"}`
//! frames. The manager never writes to the socket itself: it asks the
//! session loop to send a ping and reports a timeout when the matching pong
//! does not arrive in time.
//!
//! At most one ping is outstanding. A tick that lands while a ping is still
//! unanswered is skipped, and the timeout is measured from the moment the
//! outstanding ping was sent, not from the tick schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Time allowed for the pong before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame now. The ping is already marked outstanding.
    SendPing,
    /// The outstanding ping went unanswered for `waited`.
    Timeout {
        /// Time since the ping was sent.
        waited: Duration,
    },
}

/// State shared between the heartbeat manager and the message router.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    ping_sent_at: RwLock<Option<Instant>>,
    pings_sent: AtomicU64,
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a ping as outstanding.
    ///
    /// Returns `false` without changing anything if one is already
    /// outstanding.
    pub fn mark_ping_sent(&self) -> bool {
        let mut sent = self.ping_sent_at.write();
        if sent.is_some() {
            return false;
        }
        *sent = Some(Instant::now());
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Record a pong. Returns `true` if it cleared an outstanding ping.
    pub fn record_pong(&self) -> bool {
        self.ping_sent_at.write().take().is_some()
    }

    /// When the outstanding ping was sent.
    #[must_use]
    pub fn outstanding_since(&self) -> Option<Instant> {
        *self.ping_sent_at.read()
    }

    /// Total pings marked sent.
    #[must_use]
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }
}

/// Heartbeat manager that monitors connection health.
///
/// # Example
///
/// ```rust,no_run
/// use bybit_book_stream::infrastructure::bybit::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(8);
///     let cancel = CancellationToken::new();
///
///     let manager =
///         HeartbeatManager::new(HeartbeatConfig::default(), state.clone(), event_tx, cancel);
///     tokio::spawn(manager.run());
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             HeartbeatEvent::SendPing => { /* write {"op":"ping"} */ }
///             HeartbeatEvent::Timeout { .. } => break,
///         }
///     }
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat loop until cancelled or a timeout is reported.
    ///
    /// The first ping goes out one full interval after start.
    pub async fn run(self) {
        let start = Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self
                .state
                .outstanding_since()
                .map(|sent| sent + self.config.pong_timeout);

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                () = wait_until(deadline) => {
                    if let Some(waited) = self.expired() {
                        tracing::warn!(
                            waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                            timeout_ms = u64::try_from(self.config.pong_timeout.as_millis()).unwrap_or(u64::MAX),
                            pings_sent = self.state.pings_sent(),
                            "Heartbeat timeout detected"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout { waited }).await;
                        break;
                    }
                }
                _ = interval.tick() => {
                    if !self.state.mark_ping_sent() {
                        tracing::debug!("Ping still outstanding, skipping tick");
                        continue;
                    }
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
            }
        }
    }

    /// Elapsed time of the outstanding ping, if it is past the timeout.
    fn expired(&self) -> Option<Duration> {
        let sent = self.state.outstanding_since()?;
        let waited = sent.elapsed();
        (waited >= self.config.pong_timeout).then_some(waited)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Error type for heartbeat operations.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// Heartbeat timeout occurred.
    #[error("heartbeat timeout after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_manager(
        config: HeartbeatConfig,
    ) -> (
        Arc<HeartbeatState>,
        mpsc::Receiver<HeartbeatEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, state.clone(), event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());
        (state, event_rx, cancel, handle)
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.pong_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn state_single_outstanding_ping() {
        let state = HeartbeatState::new();
        assert!(state.outstanding_since().is_none());

        assert!(state.mark_ping_sent());
        assert!(!state.mark_ping_sent());
        assert_eq!(state.pings_sent(), 1);

        assert!(state.record_pong());
        assert!(state.outstanding_since().is_none());

        // An unsolicited pong clears nothing.
        assert!(!state.record_pong());
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_after_one_interval() {
        let config = HeartbeatConfig::new(Duration::from_secs(15), Duration::from_secs(10));
        let (state, mut event_rx, cancel, handle) = spawn_manager(config);
        let started = Instant::now();

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event, HeartbeatEvent::SendPing);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert!(state.outstanding_since().is_some());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn answered_pings_keep_flowing() {
        let config = HeartbeatConfig::new(Duration::from_secs(15), Duration::from_secs(10));
        let (state, mut event_rx, cancel, handle) = spawn_manager(config);

        for _ in 0..3 {
            assert_eq!(event_rx.recv().await.unwrap(), HeartbeatEvent::SendPing);
            tokio::time::sleep(Duration::from_secs(2)).await;
            assert!(state.record_pong());
        }
        assert_eq!(state.pings_sent(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_measured_from_ping() {
        let config = HeartbeatConfig::new(Duration::from_secs(15), Duration::from_secs(10));
        let (_state, mut event_rx, _cancel, handle) = spawn_manager(config);
        let started = Instant::now();

        assert_eq!(event_rx.recv().await.unwrap(), HeartbeatEvent::SendPing);
        let event = event_rx.recv().await.unwrap();
        assert_eq!(
            event,
            HeartbeatEvent::Timeout {
                waited: Duration::from_secs(10)
            }
        );
        assert_eq!(started.elapsed(), Duration::from_secs(25));

        // Manager exits after reporting.
        handle.await.unwrap();
        assert!(event_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_skipped_while_ping_outstanding() {
        // Timeout longer than the interval: ticks at 10s and 15s must not
        // produce a second ping.
        let config = HeartbeatConfig::new(Duration::from_secs(5), Duration::from_secs(12));
        let (state, mut event_rx, _cancel, handle) = spawn_manager(config);

        assert_eq!(event_rx.recv().await.unwrap(), HeartbeatEvent::SendPing);
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            HeartbeatEvent::Timeout { .. }
        ));
        assert_eq!(state.pings_sent(), 1);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manager_cancellation() {
        let (_state, _event_rx, cancel, handle) = spawn_manager(HeartbeatConfig::default());
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
