//! Session protocol state machine.
//!
//! Every decoded payload passes through [`Session::handle`], which reads its
//! op code and returns the [`SessionAction`]s the connection must carry out.
//! Hello (op 10) and invalid-session (op 9) are consumed here and answered with
//! identify (or resume); every other payload is delivered to the consumer
//! unchanged, whatever the phase.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatewire_proto::messages::{decode_data, EVENT_READY, EVENT_RESUMED};
use gatewire_proto::{
    CloseStatus, Envelope, GatewayCommand, HelloData, IdentifyData, IdentifyProperties, OpCode,
    ReadyData, ResumeData,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::frame::DecodedPayload;

/// Default member count above which offline members are omitted.
pub const DEFAULT_LARGE_THRESHOLD: u32 = 250;

/// Protocol phase of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected, waiting for the server's hello.
    AwaitingHello,
    /// Identify sent, waiting for the first dispatch.
    Identifying,
    /// Receiving dispatches.
    Active,
    /// Resume pending: after a resumable close, or resume sent on a new connection.
    Resuming,
    /// The session is over.
    Closed,
}

/// How to answer repeated hello payloads on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyPolicy {
    /// Every hello triggers an identify.
    #[default]
    EveryPrompt,
    /// Only the first hello triggers an identify; later ones are ignored.
    Once,
}

/// What a session is identified with.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    /// Authentication token.
    pub token: String,
    /// Client properties.
    pub properties: IdentifyProperties,
    /// Large guild member threshold.
    pub large_threshold: u32,
}

impl SessionCredentials {
    /// Credentials with default properties and threshold.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::default(),
            large_threshold: DEFAULT_LARGE_THRESHOLD,
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("token", &"<redacted>")
            .field("properties", &self.properties)
            .field("large_threshold", &self.large_threshold)
            .finish()
    }
}

/// Everything needed to resume a session on a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    /// Session identifier from `READY`.
    pub session_id: String,
    /// Last sequence number received.
    pub sequence: Option<u64>,
    /// Endpoint to reconnect to, if the server named one.
    pub resume_url: Option<String>,
}

/// Last dispatch sequence number, shared with the heartbeat task.
#[derive(Debug)]
pub struct SequenceCell(AtomicU64);

impl SequenceCell {
    // Sequence numbers start at 1 in practice but 0 is still a valid value.
    const UNSET: u64 = u64::MAX;

    /// Create a cell, optionally pre-set.
    #[must_use]
    pub fn new(sequence: Option<u64>) -> Self {
        Self(AtomicU64::new(sequence.unwrap_or(Self::UNSET)))
    }

    /// Last sequence number, `None` before the first dispatch.
    #[must_use]
    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            Self::UNSET => None,
            seq => Some(seq),
        }
    }

    /// Record a sequence number.
    pub fn set(&self, sequence: u64) {
        self.0.store(sequence, Ordering::Release);
    }

    /// Forget the sequence (new session).
    pub fn clear(&self) {
        self.0.store(Self::UNSET, Ordering::Release);
    }
}

impl Default for SequenceCell {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Something the connection must do in response to a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Deliver to the consumer.
    Deliver(DecodedPayload),
    /// Enqueue on the outbound channel.
    Send(String),
    /// (Re)start heartbeating at this interval.
    StartHeartbeat(Duration),
    /// The server acknowledged a heartbeat.
    HeartbeatAcked,
}

/// Protocol state of one logical session.
#[derive(Debug)]
pub struct Session {
    credentials: SessionCredentials,
    policy: IdentifyPolicy,
    phase: SessionPhase,
    sequence: Arc<SequenceCell>,
    session_id: Option<String>,
    resume_url: Option<String>,
    identifies_sent: u32,
}

impl Session {
    /// A new session that will identify on hello.
    #[must_use]
    pub fn new(credentials: SessionCredentials, policy: IdentifyPolicy) -> Self {
        Self {
            credentials,
            policy,
            phase: SessionPhase::AwaitingHello,
            sequence: Arc::new(SequenceCell::default()),
            session_id: None,
            resume_url: None,
            identifies_sent: 0,
        }
    }

    /// A session that will resume `state` on hello.
    #[must_use]
    pub fn resuming(
        credentials: SessionCredentials,
        policy: IdentifyPolicy,
        state: ResumeState,
    ) -> Self {
        Self {
            credentials,
            policy,
            phase: SessionPhase::Resuming,
            sequence: Arc::new(SequenceCell::new(state.sequence)),
            session_id: Some(state.session_id),
            resume_url: state.resume_url,
            identifies_sent: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Session identifier, once `READY` has been seen.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Shared sequence cell.
    #[must_use]
    pub fn sequence(&self) -> Arc<SequenceCell> {
        Arc::clone(&self.sequence)
    }

    /// Number of identify payloads emitted so far.
    #[must_use]
    pub const fn identifies_sent(&self) -> u32 {
        self.identifies_sent
    }

    /// State needed to resume, if the session got far enough to have one.
    #[must_use]
    pub fn resume_state(&self) -> Option<ResumeState> {
        self.session_id.as_ref().map(|session_id| ResumeState {
            session_id: session_id.clone(),
            sequence: self.sequence.get(),
            resume_url: self.resume_url.clone(),
        })
    }

    /// Inspect one decoded payload.
    ///
    /// # Errors
    ///
    /// [`GatewayError::MalformedPayload`] if the payload is not a JSON object
    /// with an `op` field. The caller should log it and carry on.
    pub fn handle(&mut self, payload: DecodedPayload) -> GatewayResult<Vec<SessionAction>> {
        let envelope = Envelope::peek(payload.as_str())
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        match envelope.op {
            Some(op) if op.is_handshake_trigger() => {
                if op == OpCode::HELLO {
                    self.on_hello(&payload)
                } else {
                    self.on_invalid_session(&payload)
                }
            }
            op => {
                let mut actions = Vec::with_capacity(2);
                if op == Some(OpCode::DISPATCH) {
                    self.on_dispatch(&envelope, &payload);
                } else if op == Some(OpCode::HEARTBEAT_ACK) {
                    actions.push(SessionAction::HeartbeatAcked);
                }
                actions.push(SessionAction::Deliver(payload));
                Ok(actions)
            }
        }
    }

    /// Record the connection close and move to `Resuming` or `Closed`.
    pub fn close(&mut self, status: &CloseStatus) {
        self.phase = if status.is_resumable() && self.session_id.is_some() {
            SessionPhase::Resuming
        } else {
            SessionPhase::Closed
        };
        debug!(code = status.code, phase = ?self.phase, "session closed");
    }

    fn on_hello(&mut self, payload: &DecodedPayload) -> GatewayResult<Vec<SessionAction>> {
        if self.phase == SessionPhase::Closed {
            warn!("hello received on a closed session, ignoring");
            return Ok(Vec::new());
        }

        let mut actions = Vec::with_capacity(2);
        match decode_data::<HelloData>(payload.as_str()) {
            Ok(hello) => actions.push(SessionAction::StartHeartbeat(Duration::from_millis(
                hello.heartbeat_interval,
            ))),
            Err(e) => warn!(error = %e, "hello without a usable heartbeat interval"),
        }

        if self.phase == SessionPhase::Resuming {
            if let Some(resume) = self.resume_command()? {
                actions.push(SessionAction::Send(resume));
                return Ok(actions);
            }
        }

        if self.policy == IdentifyPolicy::Once && self.identifies_sent > 0 {
            debug!(phase = ?self.phase, "already identified on this connection, not repeating");
            return Ok(actions);
        }

        actions.push(SessionAction::Send(self.identify_command()?));
        Ok(actions)
    }

    fn on_invalid_session(&mut self, payload: &DecodedPayload) -> GatewayResult<Vec<SessionAction>> {
        if self.phase == SessionPhase::Closed {
            warn!("invalid session received on a closed session, ignoring");
            return Ok(Vec::new());
        }

        let resumable = decode_data::<bool>(payload.as_str()).unwrap_or(false);
        info!(resumable, phase = ?self.phase, "session invalidated, identifying again");

        self.session_id = None;
        self.resume_url = None;
        self.sequence.clear();

        Ok(vec![SessionAction::Send(self.identify_command()?)])
    }

    fn on_dispatch(&mut self, envelope: &Envelope, payload: &DecodedPayload) {
        if let Some(seq) = envelope.s {
            self.sequence.set(seq);
        }

        if envelope.is_event(EVENT_READY) {
            match decode_data::<ReadyData>(payload.as_str()) {
                Ok(ready) => {
                    info!(session_id = %ready.session_id, "session ready");
                    self.session_id = Some(ready.session_id);
                    self.resume_url = ready.resume_gateway_url;
                }
                Err(e) => warn!(error = %e, "READY without a session id"),
            }
        } else if envelope.is_event(EVENT_RESUMED) {
            info!(seq = ?self.sequence.get(), "session resumed");
        }

        if matches!(
            self.phase,
            SessionPhase::Identifying | SessionPhase::Resuming
        ) {
            self.phase = SessionPhase::Active;
        }
    }

    fn identify_command(&mut self) -> GatewayResult<String> {
        let json = GatewayCommand::identify(IdentifyData {
            token: self.credentials.token.clone(),
            properties: self.credentials.properties.clone(),
            large_threshold: self.credentials.large_threshold,
        })
        .to_json()?;

        self.phase = SessionPhase::Identifying;
        self.identifies_sent += 1;
        debug!(count = self.identifies_sent, "identify prepared");
        Ok(json)
    }

    fn resume_command(&self) -> GatewayResult<Option<String>> {
        let Some(session_id) = self.session_id.clone() else {
            return Ok(None);
        };
        let seq = self.sequence.get();
        debug!(%session_id, ?seq, "resume prepared");

        GatewayCommand::resume(ResumeData {
            token: self.credentials.token.clone(),
            session_id,
            seq,
        })
        .to_json()
        .map(Some)
        .map_err(GatewayError::from)
    }
}
