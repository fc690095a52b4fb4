//! Connection lifecycle states.

use std::fmt;

/// Where the ingestion loop is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection open; initial state
    #[default]
    Disconnected,
    /// Request sent, waiting for the server to accept
    Connecting,
    /// Reading frames
    Streaming,
    /// Waiting out a reconnect delay
    Backoff,
    /// Loop exited (shutdown or fatal error)
    Stopped,
}

impl ConnectionState {
    /// Stable label for logs and the health endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Backoff => "backoff",
            ConnectionState::Stopped => "stopped",
        }
    }

    /// Numeric value exported as a metrics gauge.
    pub fn as_gauge(&self) -> u64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Streaming => 2,
            ConnectionState::Backoff => 3,
            ConnectionState::Stopped => 4,
        }
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Backoff)
                | (Streaming, Backoff)
                | (Backoff, Connecting)
                | (_, Stopped)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
