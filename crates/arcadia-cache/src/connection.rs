//! Connection lifecycle of the networked backend.
//!
//! The networked client reports [`ConnectionEvent`]s; [`ConnectionStatus`]
//! folds them into a single [`ConnectionState`] that the failover controller
//! reads on every call. Nothing else mutates the state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Lifecycle events emitted by a networked client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First connection attempt started.
    Connecting,
    /// Connection established and verified.
    Ready,
    /// I/O failure on the connection.
    Error(String),
    /// Retry scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Server closed the connection.
    End,
    /// Client shut down for good.
    Closed,
}

impl ConnectionState {
    /// Pure transition function.
    pub fn on(self, event: &ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Disconnected, E::Connecting) => S::Connecting,
            (_, E::Connecting) => self,
            (_, E::Ready) => S::Connected,
            (S::Connected | S::Connecting, E::Error(_) | E::End) => S::Reconnecting,
            (_, E::Error(_) | E::End) => self,
            (S::Disconnected, E::Reconnecting { .. }) => S::Disconnected,
            (_, E::Reconnecting { .. }) => S::Reconnecting,
            (_, E::Closed) => S::Disconnected,
        }
    }
}

/// Shared, observable connection state.
///
/// Cloning yields another handle to the same state.
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    backend: &'static str,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStatus {
    pub fn new(backend: &'static str) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            backend,
            state: Arc::new(state),
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }

    /// Receiver that wakes on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Apply an event, log the resulting transition, and return the new state.
    pub fn report(&self, event: ConnectionEvent) -> ConnectionState {
        let mut previous = ConnectionState::Disconnected;
        self.state.send_if_modified(|state| {
            previous = *state;
            let next = state.on(&event);
            *state = next;
            next != previous
        });
        let current = self.current();
        self.log_event(previous, current, &event);
        current
    }

    fn log_event(&self, from: ConnectionState, to: ConnectionState, event: &ConnectionEvent) {
        let backend = self.backend;
        match event {
            ConnectionEvent::Connecting => {
                tracing::info!(backend, "Connecting to networked cache");
            }
            ConnectionEvent::Ready => {
                if from == ConnectionState::Connected {
                    tracing::debug!(backend, "Networked cache connection verified");
                } else {
                    tracing::info!(backend, %from, "Connected to networked cache");
                }
            }
            ConnectionEvent::Error(message) => {
                if from == ConnectionState::Connected {
                    tracing::warn!(backend, error = %message, "Networked cache connection lost, fallback engaged");
                } else {
                    tracing::error!(backend, error = %message, state = %to, "Networked cache connection error");
                }
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                tracing::info!(
                    backend,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to networked cache"
                );
            }
            ConnectionEvent::End => {
                if from == ConnectionState::Connected {
                    tracing::warn!(backend, "Networked cache closed the connection, fallback engaged");
                } else {
                    tracing::debug!(backend, state = %to, "Networked cache connection ended");
                }
            }
            ConnectionEvent::Closed => {
                tracing::info!(backend, "Networked cache client closed");
            }
        }
    }
}

/// Reconnect delay schedule: `min(attempt * step, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub step: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(1000),
            max: Duration::from_millis(5000),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.max(1)).min(self.max)
    }
}
