//! Payload definitions.
//!
//! Inbound payloads are only partially decoded: [`Envelope`] reads the op code,
//! sequence and event name, and the `*Data` types read the `d` object of the
//! handful of payloads the session layer acts on. Everything else stays text.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::opcode::OpCode;

/// Dispatch event name of the payload that completes an identify.
pub const EVENT_READY: &str = "READY";

/// Dispatch event name of the payload that completes a resume.
pub const EVENT_RESUMED: &str = "RESUMED";

/// Routing header of every inbound payload.
///
/// Only the presence of `op` is required. A field whose value has an
/// unexpected shape (a negative op, a string sequence) reads as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    /// Operation code, `None` if `op` is not a non-negative integer.
    #[serde(deserialize_with = "lenient")]
    pub op: Option<OpCode>,
    /// Sequence number, present on dispatch payloads.
    #[serde(default, deserialize_with = "lenient")]
    pub s: Option<u64>,
    /// Event name, present on dispatch payloads.
    #[serde(default, deserialize_with = "lenient")]
    pub t: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl Envelope {
    /// Read the routing header from a payload, ignoring its body.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with an `op` field.
    pub fn peek(text: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(text).map_err(|e| ProtoError::Decoding(e.to_string()))
    }

    /// Whether this is a dispatch payload named `event`.
    #[must_use]
    pub fn is_event(&self, event: &str) -> bool {
        self.op == Some(OpCode::DISPATCH) && self.t.as_deref() == Some(event)
    }
}

#[derive(Deserialize)]
struct Body<T> {
    d: T,
}

/// Decode the `d` object of a payload.
///
/// # Errors
///
/// Returns an error if `d` is missing or does not match `T`.
pub fn decode_data<T: DeserializeOwned>(text: &str) -> Result<T, ProtoError> {
    serde_json::from_str::<Body<T>>(text)
        .map(|body| body.d)
        .map_err(|e| ProtoError::Decoding(e.to_string()))
}

/// Body of a hello payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HelloData {
    /// Interval between client heartbeats, in milliseconds.
    pub heartbeat_interval: u64,
}

/// Body of the `READY` dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadyData {
    /// Identifier used to resume this session.
    pub session_id: String,
    /// Endpoint to reconnect to when resuming.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Client properties sent with identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system.
    #[serde(rename = "$os")]
    pub os: String,
    /// Library name.
    #[serde(rename = "$browser")]
    pub browser: String,
    /// Library name.
    #[serde(rename = "$device")]
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "gatewire".to_string(),
            device: "gatewire".to_string(),
        }
    }
}

/// Body of an identify payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyData {
    /// Authentication token.
    pub token: String,
    /// Client properties.
    pub properties: IdentifyProperties,
    /// Member count above which offline guild members are not sent.
    pub large_threshold: u32,
}

/// Body of a resume payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    /// Authentication token.
    pub token: String,
    /// Session being resumed.
    pub session_id: String,
    /// Last sequence number received.
    pub seq: Option<u64>,
}

/// An outbound payload: op code plus body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCommand<T> {
    /// Operation code.
    pub op: OpCode,
    /// Body.
    pub d: T,
}

impl<T: Serialize> GatewayCommand<T> {
    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }
}

impl GatewayCommand<IdentifyData> {
    /// Create an identify command.
    #[must_use]
    pub const fn identify(data: IdentifyData) -> Self {
        Self {
            op: OpCode::IDENTIFY,
            d: data,
        }
    }
}

impl GatewayCommand<ResumeData> {
    /// Create a resume command.
    #[must_use]
    pub const fn resume(data: ResumeData) -> Self {
        Self {
            op: OpCode::RESUME,
            d: data,
        }
    }
}

impl GatewayCommand<Option<u64>> {
    /// Create a heartbeat carrying the last received sequence number.
    #[must_use]
    pub const fn heartbeat(seq: Option<u64>) -> Self {
        Self {
            op: OpCode::HEARTBEAT,
            d: seq,
        }
    }
}

/// Response of the endpoint-resolution HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    /// Base WebSocket URL, without query parameters.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_hello() {
        let env = Envelope::peek(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#)
            .expect("should peek");
        assert_eq!(env.op, Some(OpCode::HELLO));
        assert_eq!(env.s, None);
        assert_eq!(env.t, None);
    }

    #[test]
    fn test_peek_dispatch() {
        let env = Envelope::peek(r#"{"t":"MESSAGE_CREATE","s":42,"op":0,"d":{"content":"hi"}}"#)
            .expect("should peek");
        assert_eq!(env.op, Some(OpCode::DISPATCH));
        assert_eq!(env.s, Some(42));
        assert!(env.is_event("MESSAGE_CREATE"));
        assert!(!env.is_event(EVENT_READY));
    }

    #[test]
    fn test_peek_null_sequence() {
        let env = Envelope::peek(r#"{"t":null,"s":null,"op":11,"d":null}"#).expect("should peek");
        assert_eq!(env.op, Some(OpCode::HEARTBEAT_ACK));
        assert_eq!(env.s, None);
    }

    #[test]
    fn test_peek_wide_op_code() {
        let env = Envelope::peek(r#"{"op":300,"d":null}"#).expect("should peek");
        assert_eq!(env.op, Some(OpCode(300)));
    }

    #[test]
    fn test_peek_tolerates_odd_field_shapes() {
        let env = Envelope::peek(r#"{"op":-1,"s":-1,"t":7,"d":{}}"#).expect("should peek");
        assert_eq!(env.op, None);
        assert_eq!(env.s, None);
        assert_eq!(env.t, None);

        let env = Envelope::peek(r#"{"op":0,"s":2.5,"t":["READY"],"d":{}}"#).expect("should peek");
        assert_eq!(env.op, Some(OpCode::DISPATCH));
        assert_eq!(env.s, None);
        assert!(!env.is_event(EVENT_READY));
    }

    #[test]
    fn test_peek_rejects_missing_op() {
        let err = Envelope::peek(r#"{"d":{}}"#).expect_err("should fail");
        assert!(matches!(err, ProtoError::Decoding(_)));
    }

    #[test]
    fn test_peek_rejects_non_json() {
        assert!(Envelope::peek("not json").is_err());
    }

    #[test]
    fn test_decode_hello_data() {
        let hello: HelloData = decode_data(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#)
            .expect("should decode");
        assert_eq!(hello.heartbeat_interval, 45000);
    }

    #[test]
    fn test_decode_ready_data() {
        let ready: ReadyData = decode_data(
            r#"{"op":0,"s":1,"t":"READY","d":{"v":6,"session_id":"abc","resume_gateway_url":"wss://resume.example.com"}}"#,
        )
        .expect("should decode");
        assert_eq!(ready.session_id, "abc");
        assert_eq!(
            ready.resume_gateway_url.as_deref(),
            Some("wss://resume.example.com")
        );
    }

    #[test]
    fn test_decode_invalid_session_flag() {
        let resumable: bool = decode_data(r#"{"op":9,"d":false}"#).expect("should decode");
        assert!(!resumable);
    }

    #[test]
    fn test_identify_shape() {
        let cmd = GatewayCommand::identify(IdentifyData {
            token: "secret".to_string(),
            properties: IdentifyProperties {
                os: "linux".to_string(),
                browser: "disco".to_string(),
                device: "disco".to_string(),
            },
            large_threshold: 250,
        });
        let value: Value = serde_json::from_str(&cmd.to_json().expect("encode")).expect("json");

        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["token"], "secret");
        assert_eq!(value["d"]["properties"]["$os"], "linux");
        assert_eq!(value["d"]["properties"]["$browser"], "disco");
        assert_eq!(value["d"]["properties"]["$device"], "disco");
        assert_eq!(value["d"]["large_threshold"], 250);
    }

    #[test]
    fn test_resume_shape() {
        let cmd = GatewayCommand::resume(ResumeData {
            token: "secret".to_string(),
            session_id: "sess".to_string(),
            seq: Some(1337),
        });
        let value: Value = serde_json::from_str(&cmd.to_json().expect("encode")).expect("json");

        assert_eq!(value["op"], 6);
        assert_eq!(value["d"]["session_id"], "sess");
        assert_eq!(value["d"]["seq"], 1337);
    }

    #[test]
    fn test_heartbeat_shape() {
        assert_eq!(
            GatewayCommand::heartbeat(Some(7)).to_json().expect("encode"),
            r#"{"op":1,"d":7}"#
        );
        assert_eq!(
            GatewayCommand::heartbeat(None).to_json().expect("encode"),
            r#"{"op":1,"d":null}"#
        );
    }

    #[test]
    fn test_default_properties_use_host_os() {
        let props = IdentifyProperties::default();
        assert_eq!(props.os, std::env::consts::OS);
        assert_eq!(props.browser, "gatewire");
    }

    #[test]
    fn test_gateway_endpoint_parse() {
        let endpoint: GatewayEndpoint =
            serde_json::from_str(r#"{"url":"wss://gateway.example.com"}"#).expect("parse");
        assert_eq!(endpoint.url, "wss://gateway.example.com");
    }
}
