//! # gatewire
//!
//! Client for a persistent, zlib-stream compressed real-time gateway.
//!
//! A connection is built from a few small pieces:
//!
//! - [`inflate`]: one decompression context per connection, fed every binary
//!   frame in order.
//! - [`frame`]: turns transport messages into text payloads.
//! - [`session`]: answers hello / invalid-session with identify or resume and
//!   forwards everything else.
//! - [`channel`]: bounded inbound and outbound channels with backpressure.
//! - [`connection`] and [`client`]: endpoint resolution, the reader and writer
//!   tasks, close classification, and reconnects.
//!
//! ```no_run
//! use gatewire::{GatewayClient, GatewayConfig};
//! use futures::StreamExt;
//!
//! # async fn example() -> gatewire::GatewayResult<()> {
//! let client = GatewayClient::new(GatewayConfig::new("my-token"))?;
//! let mut session = client.connect().await?;
//!
//! while let Some(Ok(payload)) = session.inbound.next().await {
//!     println!("{payload}");
//! }
//!
//! let outcome = session.handle.closed().await;
//! println!("closed with {}", outcome.status);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod inflate;
pub mod reconnect;
pub mod session;
pub mod state;

pub use channel::{exchange, InboundReceiver, InboundSender, OutboundCommand, OutboundSender};
pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use connection::{spawn_session, GatewaySession, SessionHandle, SessionOptions, SessionOutcome};
pub use endpoint::{build_gateway_url, EndpointResolver, HttpEndpointResolver, StaticEndpoint};
pub use error::{GatewayError, GatewayResult};
pub use frame::{Classified, DecodedPayload, FrameClassifier, TransportMessage};
pub use inflate::InflatePipeline;
pub use session::{IdentifyPolicy, ResumeState, Session, SessionCredentials, SessionPhase};
pub use state::{AtomicConnectionState, ConnectionState};

pub use gatewire_proto::{CloseDisposition, CloseStatus, OpCode};
