//! Connection Lifecycle Types
//!
//! The connection state machine driven by the stream supervisor.
//!
//! # Transitions
//!
//! ```text
//! Disconnected ──► Connecting ──► Subscribing ──► Live
//!       ▲              │               │            │
//!       └──────────────┴───────────────┴────────────┘   (drop / failure)
//!
//! Connecting | Subscribing | Live ──► Closing ──► Disconnected   (close)
//! ```
//!
//! Only the supervisor mutates the state. Everything else observes it
//! through a [`StateHandle`].

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle state of a stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// Transport open in progress.
    Connecting,
    /// Transport open, subscribe request being issued.
    Subscribing,
    /// Subscribed and receiving data.
    Live,
    /// Explicit close in progress.
    Closing,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Subscribing | Self::Disconnected | Self::Closing)
                | (Self::Subscribing, Self::Live | Self::Disconnected | Self::Closing)
                | (Self::Live, Self::Disconnected | Self::Closing)
                | (Self::Closing, Self::Disconnected)
        )
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Live => "live",
            Self::Closing => "closing",
        }
    }

    /// Numeric encoding used for the state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Subscribing => 2.0,
            Self::Live => 3.0,
            Self::Closing => 4.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a client stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Termination {
    /// `close()` was requested by the owner.
    Closed,
    /// The reconnect policy ran out of attempts.
    ReconnectExhausted {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },
    /// The supervisor task died unexpectedly.
    Panicked,
}

/// Attempted transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection state transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State before the attempted transition.
    pub from: ConnectionState,
    /// Requested state.
    pub to: ConnectionState,
}

/// Owning side of the connection state.
///
/// Held by the supervisor; hands out read-only [`StateHandle`]s.
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a state machine in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the state unchanged if
    /// `next` is not a legal successor.
    pub fn transition(&self, next: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        let from = self.current();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.tx.send_replace(next);
        tracing::debug!(%from, to = %next, "Connection state changed");
        Ok(from)
    }

    /// Read-only handle for observers.
    #[must_use]
    pub fn handle(&self) -> StateHandle {
        StateHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of the connection state.
#[derive(Debug, Clone)]
pub struct StateHandle {
    rx: watch::Receiver<ConnectionState>,
}

impl StateHandle {
    /// Current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    /// Whether the client is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.get() == ConnectionState::Live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ConnectionState::Disconnected, ConnectionState::Connecting ; "start")]
    #[test_case(ConnectionState::Connecting, ConnectionState::Subscribing ; "opened")]
    #[test_case(ConnectionState::Connecting, ConnectionState::Disconnected ; "open failed")]
    #[test_case(ConnectionState::Subscribing, ConnectionState::Live ; "subscribed")]
    #[test_case(ConnectionState::Live, ConnectionState::Disconnected ; "dropped")]
    #[test_case(ConnectionState::Live, ConnectionState::Closing ; "closing")]
    #[test_case(ConnectionState::Closing, ConnectionState::Disconnected ; "closed")]
    fn legal_transitions(from: ConnectionState, to: ConnectionState) {
        assert!(from.can_transition_to(to));
    }

    #[test_case(ConnectionState::Connecting, ConnectionState::Live ; "skip subscribing")]
    #[test_case(ConnectionState::Disconnected, ConnectionState::Live ; "disconnected to live")]
    #[test_case(ConnectionState::Disconnected, ConnectionState::Subscribing ; "disconnected to subscribing")]
    #[test_case(ConnectionState::Live, ConnectionState::Connecting ; "live to connecting")]
    #[test_case(ConnectionState::Closing, ConnectionState::Connecting ; "closing to connecting")]
    #[test_case(ConnectionState::Live, ConnectionState::Live ; "self loop")]
    fn illegal_transitions(from: ConnectionState, to: ConnectionState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn machine_rejects_skipping_subscribing() {
        let machine = StateMachine::new();
        machine.transition(ConnectionState::Connecting).unwrap();

        let err = machine.transition(ConnectionState::Live).unwrap_err();
        assert_eq!(err.from, ConnectionState::Connecting);
        assert_eq!(err.to, ConnectionState::Live);
        assert_eq!(machine.current(), ConnectionState::Connecting);
    }

    #[test]
    fn handle_observes_transitions() {
        let machine = StateMachine::new();
        let handle = machine.handle();
        assert_eq!(handle.get(), ConnectionState::Disconnected);

        machine.transition(ConnectionState::Connecting).unwrap();
        machine.transition(ConnectionState::Subscribing).unwrap();
        machine.transition(ConnectionState::Live).unwrap();

        assert!(handle.is_live());
    }

    #[test]
    fn termination_serialization() {
        let json = serde_json::to_string(&Termination::ReconnectExhausted { attempts: 5 }).unwrap();
        assert_eq!(json, r#"{"reason":"reconnect_exhausted","attempts":5}"#);
        assert_eq!(
            serde_json::to_string(&Termination::Closed).unwrap(),
            r#"{"reason":"closed"}"#
        );
        assert_eq!(
            serde_json::to_string(&Termination::Panicked).unwrap(),
            r#"{"reason":"panicked"}"#
        );
    }
}
