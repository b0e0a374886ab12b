//! Gateway operation codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric tag identifying the protocol role of a payload.
///
/// Kept as an open newtype rather than an enum: the gateway may introduce op
/// codes this client does not know, and those must still be forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpCode(pub u64);

impl OpCode {
    /// An event was dispatched.
    pub const DISPATCH: Self = Self(0);
    /// Keepalive, sent by the client (and occasionally requested by the server).
    pub const HEARTBEAT: Self = Self(1);
    /// Start a new session.
    pub const IDENTIFY: Self = Self(2);
    /// Update the client presence.
    pub const PRESENCE_UPDATE: Self = Self(3);
    /// Join, move or leave voice channels.
    pub const VOICE_STATE_UPDATE: Self = Self(4);
    /// Resume a previous session.
    pub const RESUME: Self = Self(6);
    /// Server asks the client to reconnect and resume.
    pub const RECONNECT: Self = Self(7);
    /// Request guild member chunks.
    pub const REQUEST_GUILD_MEMBERS: Self = Self(8);
    /// The session has been invalidated; the client must identify again.
    pub const INVALID_SESSION: Self = Self(9);
    /// First payload after connecting; carries the heartbeat interval.
    pub const HELLO: Self = Self(10);
    /// Server acknowledged a heartbeat.
    pub const HEARTBEAT_ACK: Self = Self(11);

    /// Whether this op code is consumed by the session layer and answered
    /// with a handshake instead of reaching the consumer.
    #[must_use]
    pub const fn is_handshake_trigger(self) -> bool {
        self.0 == Self::HELLO.0 || self.0 == Self::INVALID_SESSION.0
    }

    /// Human-readable name, `None` for op codes this crate does not know.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("dispatch"),
            1 => Some("heartbeat"),
            2 => Some("identify"),
            3 => Some("presence_update"),
            4 => Some("voice_state_update"),
            6 => Some("resume"),
            7 => Some("reconnect"),
            8 => Some("request_guild_members"),
            9 => Some("invalid_session"),
            10 => Some("hello"),
            11 => Some("heartbeat_ack"),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "op({})", self.0),
        }
    }
}
