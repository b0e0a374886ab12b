//! Error types for the gatewire-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or inspecting gateway payloads.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a payload.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a payload.
    #[error("decoding error: {0}")]
    Decoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_error_display() {
        let err = ProtoError::Encoding("bad map key".to_string());
        assert_eq!(err.to_string(), "encoding error: bad map key");
    }

    #[test]
    fn test_decoding_error_display() {
        let err = ProtoError::Decoding("missing field `op`".to_string());
        assert_eq!(err.to_string(), "decoding error: missing field `op`");
    }
}
