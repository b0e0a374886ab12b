//! Connection state shared between the client and its tasks.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected = 0,
    /// Asking the HTTP API for the gateway endpoint.
    Resolving = 1,
    /// Opening the WebSocket.
    Connecting = 2,
    /// Connection open, pipeline installed.
    Connected = 3,
    /// Waiting to reconnect after a resumable close.
    Reconnecting = 4,
    /// Closed fatally or out of reconnect attempts.
    Failed = 5,
}

impl ConnectionState {
    /// Lower-case name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Resolving,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Reconnecting,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding a [`ConnectionState`].
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Create a cell.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Replace the state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_cell() {
        let cell = AtomicConnectionState::default();
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Resolving,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
