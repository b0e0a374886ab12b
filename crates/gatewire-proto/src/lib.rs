//! # gatewire-proto
//!
//! Wire definitions for the real-time gateway: operation codes, the payload
//! envelopes the session layer inspects, the control payloads it originates,
//! and close-code classification.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod error;
pub mod messages;
pub mod opcode;

pub use close::{CloseDisposition, CloseStatus};
pub use error::ProtoError;
pub use messages::{
    Envelope, GatewayCommand, GatewayEndpoint, HelloData, IdentifyData, IdentifyProperties,
    ReadyData, ResumeData,
};
pub use opcode::OpCode;

/// Gateway API version requested when none is configured.
pub const DEFAULT_GATEWAY_VERSION: u8 = 6;

/// Payload text encoding requested from the gateway.
pub const ENCODING_JSON: &str = "json";

/// Transport compression mode: one zlib context for the whole connection.
pub const COMPRESS_ZLIB_STREAM: &str = "zlib-stream";

/// Trailer that ends every complete message on a `zlib-stream` connection
/// (the empty stored block emitted by a sync flush).
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
