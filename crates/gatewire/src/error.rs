//! Error types for gatewire.

use gatewire_proto::ProtoError;
use thiserror::Error;

/// Errors that can occur while running a gateway session.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The gateway endpoint could not be resolved.
    #[error("endpoint resolution failed: {0}")]
    EndpointResolution(String),

    /// Opening the gateway connection failed.
    #[error("gateway connection failed: {0}")]
    GatewayConnection(String),

    /// Sending or receiving on an open connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The compressed stream can no longer be decoded. Always fatal.
    #[error("compressed stream corrupted: {0}")]
    StreamCorrupted(String),

    /// A single payload could not be decoded; the connection is unaffected.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The channel was completed or the connection closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),
}

impl GatewayError {
    /// Whether this error ends the connection it occurred on.
    #[must_use]
    pub const fn terminates_connection(&self) -> bool {
        !matches!(self, Self::MalformedPayload(_) | Self::Protocol(_))
    }

    /// Whether opening a connection may succeed if tried again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EndpointResolution(_) | Self::GatewayConnection(_) | Self::Transport(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::EndpointResolution(err.to_string())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
