//! Close status and resumability classification.

use std::fmt;

/// Close codes used by the gateway and by this client.
pub mod codes {
    /// Normal closure; the session is over.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away.
    pub const GOING_AWAY: u16 = 1001;
    /// No close frame was received (transport failure).
    pub const ABNORMAL: u16 = 1006;
    /// Received data could not be decoded (stream corruption).
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Local failure while serving the connection.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Unknown gateway error.
    pub const UNKNOWN_ERROR: u16 = 4000;
    /// Client sent an invalid op code.
    pub const UNKNOWN_OPCODE: u16 = 4001;
    /// Client sent an undecodable payload.
    pub const DECODE_ERROR: u16 = 4002;
    /// Client sent a payload before identifying.
    pub const NOT_AUTHENTICATED: u16 = 4003;
    /// Token rejected.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// Client identified twice.
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    /// Resume carried an invalid sequence.
    pub const INVALID_SEQ: u16 = 4007;
    /// Client is sending too fast.
    pub const RATE_LIMITED: u16 = 4008;
    /// Session timed out.
    pub const SESSION_TIMED_OUT: u16 = 4009;
    /// Invalid shard.
    pub const INVALID_SHARD: u16 = 4010;
    /// Sharding required.
    pub const SHARDING_REQUIRED: u16 = 4011;
    /// Invalid API version.
    pub const INVALID_API_VERSION: u16 = 4012;
    /// Invalid intents.
    pub const INVALID_INTENTS: u16 = 4013;
    /// Disallowed intents.
    pub const DISALLOWED_INTENTS: u16 = 4014;
}

/// What the lifecycle manager should do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Reconnect and resume the session.
    Resumable,
    /// The session is over; report and stop.
    Fatal,
}

/// Terminal event of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Close code.
    pub code: u16,
    /// Close reason, possibly empty.
    pub reason: String,
}

impl CloseStatus {
    /// Create a close status.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close status recorded when the transport dropped without a close frame.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(codes::ABNORMAL, reason)
    }

    /// Classify this close.
    #[must_use]
    pub const fn disposition(&self) -> CloseDisposition {
        match self.code {
            codes::GOING_AWAY
            | codes::ABNORMAL
            | codes::UNKNOWN_ERROR
            | codes::UNKNOWN_OPCODE
            | codes::DECODE_ERROR
            | codes::NOT_AUTHENTICATED
            | codes::ALREADY_AUTHENTICATED
            | codes::INVALID_SEQ
            | codes::RATE_LIMITED
            | codes::SESSION_TIMED_OUT => CloseDisposition::Resumable,
            _ => CloseDisposition::Fatal,
        }
    }

    /// Shorthand for `disposition() == Resumable`.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        matches!(self.disposition(), CloseDisposition::Resumable)
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(codes::GOING_AWAY ; "going away")]
    #[test_case(codes::ABNORMAL ; "abnormal")]
    #[test_case(codes::UNKNOWN_ERROR ; "unknown error")]
    #[test_case(codes::DECODE_ERROR ; "decode error")]
    #[test_case(codes::RATE_LIMITED ; "rate limited")]
    #[test_case(codes::SESSION_TIMED_OUT ; "session timed out")]
    fn test_resumable_codes(code: u16) {
        assert_eq!(
            CloseStatus::new(code, "").disposition(),
            CloseDisposition::Resumable
        );
    }

    #[test_case(codes::NORMAL ; "normal")]
    #[test_case(codes::INVALID_PAYLOAD ; "stream corruption")]
    #[test_case(codes::INTERNAL_ERROR ; "internal error")]
    #[test_case(codes::AUTHENTICATION_FAILED ; "authentication failed")]
    #[test_case(codes::INVALID_SHARD ; "invalid shard")]
    #[test_case(codes::DISALLOWED_INTENTS ; "disallowed intents")]
    fn test_fatal_codes(code: u16) {
        assert_eq!(CloseStatus::new(code, "").disposition(), CloseDisposition::Fatal);
    }

    #[test]
    fn test_abnormal_is_resumable() {
        let status = CloseStatus::abnormal("connection reset");
        assert_eq!(status.code, codes::ABNORMAL);
        assert!(status.is_resumable());
    }

    #[test]
    fn test_display() {
        assert_eq!(CloseStatus::new(4004, "").to_string(), "4004");
        assert_eq!(
            CloseStatus::new(4004, "Authentication failed.").to_string(),
            "4004 (Authentication failed.)"
        );
    }

    proptest! {
        #[test]
        fn test_unassigned_private_codes_are_fatal(code in 4015u16..5000) {
            prop_assert_eq!(CloseStatus::new(code, "").disposition(), CloseDisposition::Fatal);
        }
    }
}
