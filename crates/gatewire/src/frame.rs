//! Frame classification: transport messages in, text payloads out.

use std::fmt;

use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

use crate::error::GatewayResult;
use crate::inflate::InflatePipeline;

/// One inbound unit from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// A text frame, already valid UTF-8.
    Text(String),
    /// A binary frame: one fragment of the compressed stream.
    Binary(Vec<u8>),
}

impl TransportMessage {
    /// Convert a WebSocket message, returning `None` for control frames.
    #[must_use]
    pub fn from_ws(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            Message::Binary(bytes) => Some(Self::Binary(bytes.to_vec())),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One logical protocol message as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodedPayload(String);

impl DecodedPayload {
    /// Wrap decoded text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Payload text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the payload text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DecodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DecodedPayload {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Result of classifying one transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// A complete payload.
    Payload(DecodedPayload),
    /// A compressed fragment was absorbed; its message is not complete yet.
    Partial,
}

/// Routes binary frames through the connection's inflate pipeline and passes
/// text frames through unchanged.
///
/// Owns the pipeline, so classification must happen on a single task.
#[derive(Debug, Default)]
pub struct FrameClassifier {
    inflater: InflatePipeline,
}

impl FrameClassifier {
    /// Create a classifier with a fresh compressed-stream context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflater: InflatePipeline::new(),
        }
    }

    /// Classify one transport message.
    ///
    /// # Errors
    ///
    /// Propagates inflate errors; see [`InflatePipeline::feed`].
    pub fn classify(&mut self, message: TransportMessage) -> GatewayResult<Classified> {
        match message {
            TransportMessage::Text(text) => Ok(Classified::Payload(DecodedPayload(text))),
            TransportMessage::Binary(bytes) => {
                let decoded = self.inflater.feed(&bytes)?;
                trace!(
                    compressed = bytes.len(),
                    complete = decoded.is_some(),
                    "classified binary frame"
                );
                Ok(decoded.map_or(Classified::Partial, |text| {
                    Classified::Payload(DecodedPayload(text))
                }))
            }
        }
    }

    /// The underlying inflate pipeline.
    #[must_use]
    pub const fn inflater(&self) -> &InflatePipeline {
        &self.inflater
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::inflate::testing::deflate_messages;

    #[test]
    fn test_text_frame_passes_through() {
        let mut classifier = FrameClassifier::new();
        let raw = r#"{"op":0,"s":5,"t":"TYPING_START","d":{}}"#;

        let out = classifier
            .classify(TransportMessage::Text(raw.to_string()))
            .expect("classify");

        assert_eq!(out, Classified::Payload(DecodedPayload::new(raw)));
        assert_eq!(classifier.inflater().total_in(), 0);
    }

    #[test]
    fn test_text_frame_is_not_json_checked() {
        let mut classifier = FrameClassifier::new();
        let out = classifier
            .classify(TransportMessage::Text("not json at all".to_string()))
            .expect("classify");
        assert_eq!(out, Classified::Payload(DecodedPayload::new("not json at all")));
    }

    #[test]
    fn test_binary_frames_share_one_stream() {
        let frames = deflate_messages(&[r#"{"op":10,"d":{"heartbeat_interval":1}}"#, r#"{"op":11}"#]);
        let mut classifier = FrameClassifier::new();

        let first = classifier
            .classify(TransportMessage::Binary(frames[0].clone()))
            .expect("classify");
        let second = classifier
            .classify(TransportMessage::Binary(frames[1].clone()))
            .expect("classify");

        assert_eq!(
            first,
            Classified::Payload(DecodedPayload::new(r#"{"op":10,"d":{"heartbeat_interval":1}}"#))
        );
        assert_eq!(second, Classified::Payload(DecodedPayload::new(r#"{"op":11}"#)));
    }

    #[test]
    fn test_interleaved_text_does_not_disturb_stream() {
        let frames = deflate_messages(&["one", "two"]);
        let mut classifier = FrameClassifier::new();

        classifier
            .classify(TransportMessage::Binary(frames[0].clone()))
            .expect("classify");
        classifier
            .classify(TransportMessage::Text("plain".to_string()))
            .expect("classify");
        let out = classifier
            .classify(TransportMessage::Binary(frames[1].clone()))
            .expect("classify");

        assert_eq!(out, Classified::Payload(DecodedPayload::new("two")));
    }

    #[test]
    fn test_partial_binary_frame() {
        let frames = deflate_messages(&["a longer message split in two"]);
        let (head, tail) = frames[0].split_at(3);
        let mut classifier = FrameClassifier::new();

        assert_eq!(
            classifier
                .classify(TransportMessage::Binary(head.to_vec()))
                .expect("classify"),
            Classified::Partial
        );
        assert_eq!(
            classifier
                .classify(TransportMessage::Binary(tail.to_vec()))
                .expect("classify"),
            Classified::Payload(DecodedPayload::new("a longer message split in two"))
        );
    }

    #[test]
    fn test_corrupted_binary_is_fatal() {
        let mut classifier = FrameClassifier::new();
        let err = classifier
            .classify(TransportMessage::Binary(vec![1, 2, 3, 4, 0, 0, 0xff, 0xff]))
            .expect_err("should fail");
        assert!(matches!(err, GatewayError::StreamCorrupted(_)));
    }

    #[test]
    fn test_from_ws_skips_control_frames() {
        assert_eq!(
            TransportMessage::from_ws(Message::Text("hi".into())),
            Some(TransportMessage::Text("hi".to_string()))
        );
        assert_eq!(
            TransportMessage::from_ws(Message::Binary(vec![1u8, 2].into())),
            Some(TransportMessage::Binary(vec![1, 2]))
        );
        assert_eq!(TransportMessage::from_ws(Message::Ping(Vec::<u8>::new().into())), None);
        assert_eq!(TransportMessage::from_ws(Message::Close(None)), None);
    }

    #[test]
    fn test_transport_message_len() {
        assert_eq!(TransportMessage::Text("abc".to_string()).len(), 3);
        assert!(TransportMessage::Binary(Vec::new()).is_empty());
    }
}
