//! Client configuration.
//!
//! Loaded from TOML. Every section has serde defaults, so a minimal file only
//! needs the token:
//!
//! ```toml
//! token = "..."
//!
//! [identify]
//! large_threshold = 100
//! ```

use std::path::Path;
use std::time::Duration;

use gatewire_proto::{IdentifyProperties, DEFAULT_GATEWAY_VERSION};
use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::error::{GatewayError, GatewayResult};
use crate::heartbeat::HeartbeatConfig;
use crate::reconnect::ReconnectConfig;
use crate::session::{IdentifyPolicy, SessionCredentials, DEFAULT_LARGE_THRESHOLD};

/// Default REST base used to resolve the gateway endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v6";

/// Identify payload settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdentifyConfig {
    /// Reported operating system.
    pub os: String,
    /// Reported library name.
    pub browser: String,
    /// Reported device name.
    pub device: String,
    /// Member count above which offline members are omitted.
    pub large_threshold: u32,
    /// Handling of repeated hello payloads.
    pub policy: IdentifyPolicy,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        let properties = IdentifyProperties::default();
        Self {
            os: properties.os,
            browser: properties.browser,
            device: properties.device,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            policy: IdentifyPolicy::default(),
        }
    }
}

/// Channel capacities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Payloads buffered for the consumer.
    pub inbound_capacity: usize,
    /// Payloads buffered for the transport.
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_CHANNEL_CAPACITY,
            outbound_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Reconnect backoff, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    /// Whether resumable closes are retried at all.
    pub enabled: bool,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay.
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Attempts before giving up.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            backoff_multiplier: section.backoff_multiplier,
            max_attempts: section.max_attempts,
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

const fn default_version() -> u8 {
    DEFAULT_GATEWAY_VERSION
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_close_timeout_ms() -> u64 {
    5_000
}

/// Main client configuration.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Bot token. May be left empty in the file and supplied at load time.
    #[serde(default)]
    pub token: String,
    /// REST base for endpoint resolution.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Fixed gateway URL; skips endpoint resolution when set.
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Gateway API version.
    #[serde(default = "default_version")]
    pub version: u8,
    /// Timeout for resolving and opening the connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Wait for the server's close echo before dropping the transport.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// Identify settings.
    #[serde(default)]
    pub identify: IdentifyConfig,
    /// Channel capacities.
    #[serde(default)]
    pub channels: ChannelConfig,
    /// Heartbeat settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Reconnect settings.
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("gateway_url", &self.gateway_url)
            .field("version", &self.version)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("close_timeout_ms", &self.close_timeout_ms)
            .field("identify", &self.identify)
            .field("channels", &self.channels)
            .field("heartbeat", &self.heartbeat)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl GatewayConfig {
    /// Defaults around `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base_url: default_api_base_url(),
            gateway_url: None,
            version: default_version(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            identify: IdentifyConfig::default(),
            channels: ChannelConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectSection::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        Self::load(path, None)
    }

    /// Load from a TOML file, replacing the token when `token` is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>, token: Option<String>) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        let mut config = Self::parse(&content)?;
        if let Some(token) = token {
            config.token = token;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> GatewayResult<Self> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> GatewayResult<Self> {
        toml::from_str(content).map_err(|e| GatewayError::Config(format!("invalid TOML: {e}")))
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> GatewayResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("failed to serialize config: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.token.trim().is_empty() {
            return Err(GatewayError::Config("token cannot be empty".to_string()));
        }

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(GatewayError::Config(
                "api_base_url must start with http:// or https://".to_string(),
            ));
        }

        if let Some(url) = &self.gateway_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(GatewayError::Config(
                    "gateway_url must start with ws:// or wss://".to_string(),
                ));
            }
        }

        if self.channels.inbound_capacity == 0 || self.channels.outbound_capacity == 0 {
            return Err(GatewayError::Config(
                "channel capacities must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.max_missed_acks == 0 {
            return Err(GatewayError::Config(
                "heartbeat.max_missed_acks must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(GatewayError::Config(
                "reconnect.initial_delay_ms cannot exceed reconnect.max_delay_ms".to_string(),
            ));
        }

        if !self.reconnect.backoff_multiplier.is_finite() || self.reconnect.backoff_multiplier < 1.0
        {
            return Err(GatewayError::Config(
                "reconnect.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Credentials for identify and resume.
    #[must_use]
    pub fn credentials(&self) -> SessionCredentials {
        SessionCredentials {
            token: self.token.clone(),
            properties: IdentifyProperties {
                os: self.identify.os.clone(),
                browser: self.identify.browser.clone(),
                device: self.identify.device.clone(),
            },
            large_threshold: self.identify.large_threshold,
        }
    }

    /// Backoff for the reconnect loop.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from(&self.reconnect)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Close handshake timeout.
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
