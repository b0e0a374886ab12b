//! Gateway client: endpoint resolution, connection setup and the reconnect
//! loop.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{InboundReceiver, OutboundSender};
use crate::config::GatewayConfig;
use crate::connection::{spawn_session, GatewaySession, SessionOptions, SessionOutcome};
use crate::endpoint::{
    build_gateway_url, EndpointResolver, EndpointSource, HttpEndpointResolver, StaticEndpoint,
};
use crate::error::{GatewayError, GatewayResult};
use crate::reconnect::reconnect_with_backoff;
use crate::session::{ResumeState, Session};
use crate::state::{AtomicConnectionState, ConnectionState};

/// Opens gateway connections for one set of credentials.
#[derive(Debug)]
pub struct GatewayClient<R = EndpointSource> {
    config: GatewayConfig,
    resolver: R,
    options: SessionOptions,
    state: Arc<AtomicConnectionState>,
}

impl GatewayClient<EndpointSource> {
    /// Create a client, resolving the endpoint over HTTP unless the config
    /// names a fixed `gateway_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let resolver = match &config.gateway_url {
            Some(url) => EndpointSource::Static(StaticEndpoint::parse(url)?),
            None => EndpointSource::Http(HttpEndpointResolver::new(
                config.api_base_url.clone(),
                config.token.clone(),
                config.connect_timeout(),
            )?),
        };
        Ok(Self::with_resolver(config, resolver))
    }
}

impl<R: EndpointResolver> GatewayClient<R> {
    /// Create a client with a custom endpoint resolver.
    #[must_use]
    pub fn with_resolver(config: GatewayConfig, resolver: R) -> Self {
        let options = SessionOptions::from(&config);
        Self {
            config,
            resolver,
            options,
            state: Arc::new(AtomicConnectionState::default()),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Shared view of the connection state.
    #[must_use]
    pub fn state_handle(&self) -> Arc<AtomicConnectionState> {
        Arc::clone(&self.state)
    }

    /// The configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open a new session: resolve, connect, and identify on hello.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution or the connection fails.
    pub async fn connect(&self) -> GatewayResult<GatewaySession> {
        self.open(None).await
    }

    /// Open a connection that resumes `resume` on hello.
    ///
    /// Connects to the session's resume URL when it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution or the connection fails.
    pub async fn resume(&self, resume: ResumeState) -> GatewayResult<GatewaySession> {
        self.open(Some(resume)).await
    }

    async fn open(&self, resume: Option<ResumeState>) -> GatewayResult<GatewaySession> {
        let result = self.try_open(resume).await;
        match &result {
            Ok(_) => self.state.store(ConnectionState::Connected),
            Err(e) => {
                debug!(error = %e, "connection attempt failed");
                self.state.store(ConnectionState::Disconnected);
            }
        }
        result
    }

    async fn try_open(&self, resume: Option<ResumeState>) -> GatewayResult<GatewaySession> {
        let base = match resume.as_ref().and_then(|r| r.resume_url.as_deref()) {
            Some(resume_url) => Url::parse(resume_url).map_err(|e| {
                GatewayError::EndpointResolution(format!("invalid resume url '{resume_url}': {e}"))
            })?,
            None => {
                self.state.store(ConnectionState::Resolving);
                self.resolver.resolve().await?
            }
        };
        let url = build_gateway_url(&base, self.config.version);

        self.state.store(ConnectionState::Connecting);
        info!(%url, resuming = resume.is_some(), "connecting to gateway");

        let (ws, _response) = timeout(self.config.connect_timeout(), connect_async(url.as_str()))
            .await
            .map_err(|_| GatewayError::GatewayConnection("connection timeout".to_string()))?
            .map_err(|e| GatewayError::GatewayConnection(e.to_string()))?;

        let credentials = self.config.credentials();
        let policy = self.config.identify.policy;
        let session = match resume {
            Some(state) => Session::resuming(credentials, policy, state),
            None => Session::new(credentials, policy),
        };

        Ok(spawn_session(ws, session, &self.options))
    }

    /// Keep a session alive across resumable closes.
    ///
    /// `on_session` is called with the channel ends of every connection and
    /// should return once it is done with them (normally when the inbound
    /// stream ends). Returns the outcome of the last connection: a fatal close,
    /// or a resumable one once reconnects are disabled or exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be opened and retrying is
    /// pointless or exhausted.
    pub async fn run<F, Fut>(&self, mut on_session: F) -> GatewayResult<SessionOutcome>
    where
        F: FnMut(InboundReceiver, OutboundSender) -> Fut,
        Fut: Future<Output = ()>,
    {
        let reconnect = self.config.reconnect_config();
        let mut between_sessions = reconnect.backoff();
        let mut resume: Option<ResumeState> = None;

        loop {
            let opened = reconnect_with_backoff(&reconnect, GatewayError::is_retryable, || {
                self.open(resume.clone())
            })
            .await;

            let GatewaySession {
                inbound,
                outbound,
                handle,
            } = match opened {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "giving up on the gateway");
                    self.state.store(ConnectionState::Failed);
                    return Err(e);
                }
            };

            let (outcome, ()) = tokio::join!(handle.closed(), on_session(inbound, outbound));

            if !outcome.is_resumable() {
                self.state.store(ConnectionState::Disconnected);
                return Ok(outcome);
            }
            if !self.config.reconnect.enabled {
                self.state.store(ConnectionState::Disconnected);
                return Ok(outcome);
            }

            if outcome.resume.is_some() {
                between_sessions.reset();
            }
            let Some(delay) = between_sessions.next_delay() else {
                warn!(attempts = between_sessions.attempt(), "reconnect attempts exhausted");
                self.state.store(ConnectionState::Failed);
                return Ok(outcome);
            };

            self.state.store(ConnectionState::Reconnecting);
            info!(
                code = outcome.status.code,
                ?delay,
                resuming = outcome.resume.is_some(),
                "reconnecting"
            );
            resume = outcome.resume;
            sleep(delay).await;
        }
    }
}
