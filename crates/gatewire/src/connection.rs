//! One gateway connection: reader task, writer task and their supervisor.
//!
//! The reader owns the frame classifier (and with it the compressed stream
//! context) and the session state machine. The writer drains the shared
//! outbound queue into the socket. Both stop on a shared
//! [`CancellationToken`]; the supervisor then classifies the close status,
//! publishes the [`SessionOutcome`] and terminates the inbound channel.

use std::ops::ControlFlow;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use gatewire_proto::close::codes;
use gatewire_proto::{CloseDisposition, CloseStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{
    exchange, InboundReceiver, InboundSender, OutboundCommand, OutboundQueue, OutboundSender,
    DEFAULT_CHANNEL_CAPACITY,
};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::frame::{Classified, DecodedPayload, FrameClassifier, TransportMessage};
use crate::heartbeat::{start_heartbeat_task, HeartbeatConfig, HeartbeatHandle};
use crate::session::{ResumeState, Session, SessionAction};

/// Longest close reason a close frame can carry.
const MAX_CLOSE_REASON: usize = 123;

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Inbound channel capacity.
    pub inbound_capacity: usize,
    /// Outbound channel capacity.
    pub outbound_capacity: usize,
    /// Heartbeat behaviour.
    pub heartbeat: HeartbeatConfig,
    /// How long to wait for the server to answer a local close.
    pub close_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_CHANNEL_CAPACITY,
            outbound_capacity: DEFAULT_CHANNEL_CAPACITY,
            heartbeat: HeartbeatConfig::default(),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&GatewayConfig> for SessionOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            inbound_capacity: config.channels.inbound_capacity,
            outbound_capacity: config.channels.outbound_capacity,
            heartbeat: config.heartbeat.clone(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Close status the classification was made on.
    pub status: CloseStatus,
    /// Resumable or fatal.
    pub disposition: CloseDisposition,
    /// State to resume with; only set when the close is resumable and the
    /// session had been established.
    pub resume: Option<ResumeState>,
}

impl SessionOutcome {
    fn new(status: CloseStatus, resume: Option<ResumeState>) -> Self {
        let disposition = status.disposition();
        let resume = if disposition == CloseDisposition::Resumable {
            resume
        } else {
            None
        };
        Self {
            status,
            disposition,
            resume,
        }
    }

    /// Whether a new connection may continue this session.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.disposition == CloseDisposition::Resumable
    }
}

/// Waits for, or forces, the end of a connection.
#[derive(Debug)]
pub struct SessionHandle {
    outcome: oneshot::Receiver<SessionOutcome>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Wait until the connection has closed and return its classification.
    pub async fn closed(self) -> SessionOutcome {
        self.outcome.await.unwrap_or_else(|_| {
            SessionOutcome::new(CloseStatus::abnormal("connection supervisor stopped"), None)
        })
    }

    /// Tear the connection down without waiting for a close handshake.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

/// An open connection as seen by the application.
#[derive(Debug)]
pub struct GatewaySession {
    /// Payloads from the gateway, in arrival order.
    pub inbound: InboundReceiver,
    /// Payloads to the gateway; shares its queue with the protocol.
    pub outbound: OutboundSender,
    /// Connection end.
    pub handle: SessionHandle,
}

/// Run `session` over an established WebSocket.
pub fn spawn_session<S>(
    ws: WebSocketStream<S>,
    session: Session,
    options: &SessionOptions,
) -> GatewaySession
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let (consumer, connection) = exchange(options.inbound_capacity, options.outbound_capacity);
    let cancel = CancellationToken::new();
    let closing = CancellationToken::new();
    let (outcome_tx, outcome_rx) = oneshot::channel();

    let reader = Reader {
        classifier: FrameClassifier::new(),
        session,
        inbound: connection.inbound,
        protocol: connection.protocol,
        heartbeat: None,
        heartbeat_config: options.heartbeat.clone(),
        cancel: cancel.clone(),
        closing: closing.clone(),
        corrupted: None,
        consumer_gone: false,
    };
    let writer = Writer {
        outbound: connection.outbound,
        cancel: cancel.clone(),
        closing,
        close_timeout: options.close_timeout,
    };

    let supervisor_cancel = cancel.clone();
    tokio::spawn(async move {
        let writer_task = tokio::spawn(writer.run(sink));
        let ReaderOutput {
            exit,
            mut session,
            mut inbound,
        } = reader.run(stream).await;
        supervisor_cancel.cancel();

        let writer_exit = writer_task.await.unwrap_or_else(|e| {
            WriterExit::Failed(GatewayError::Transport(format!("writer task failed: {e}")))
        });

        let (status, terminal) = settle(writer_exit, exit);
        session.close(&status);
        let outcome = SessionOutcome::new(status, session.resume_state());
        info!(
            code = outcome.status.code,
            reason = %outcome.status.reason,
            disposition = ?outcome.disposition,
            "gateway connection closed"
        );
        let _ = outcome_tx.send(outcome);

        match terminal {
            Some(err) => inbound.error(err).await,
            None => inbound.complete(),
        }
    });

    GatewaySession {
        inbound: consumer.inbound,
        outbound: consumer.outbound,
        handle: SessionHandle {
            outcome: outcome_rx,
            cancel,
        },
    }
}

/// Pick the close status to classify and the inbound terminal signal.
fn settle(writer: WriterExit, reader: ReaderExit) -> (CloseStatus, Option<GatewayError>) {
    match (writer, reader) {
        (_, ReaderExit::Corrupted(err)) => (
            CloseStatus::new(codes::INVALID_PAYLOAD, err.to_string()),
            Some(err),
        ),
        (WriterExit::LocalClose(status), _) => (status, None),
        (_, ReaderExit::ServerClosed(status)) => (status, None),
        (_, ReaderExit::TransportLost(err)) | (WriterExit::Failed(err), ReaderExit::Cancelled) => {
            (CloseStatus::abnormal(err.to_string()), Some(err))
        }
        (WriterExit::Cancelled, ReaderExit::Cancelled) => {
            (CloseStatus::new(codes::NORMAL, "connection aborted"), None)
        }
    }
}

#[derive(Debug)]
enum ReaderExit {
    ServerClosed(CloseStatus),
    TransportLost(GatewayError),
    Corrupted(GatewayError),
    Cancelled,
}

struct ReaderOutput {
    exit: ReaderExit,
    session: Session,
    inbound: InboundSender,
}

struct Reader {
    classifier: FrameClassifier,
    session: Session,
    inbound: InboundSender,
    protocol: OutboundSender,
    heartbeat: Option<HeartbeatHandle>,
    heartbeat_config: HeartbeatConfig,
    cancel: CancellationToken,
    closing: CancellationToken,
    corrupted: Option<GatewayError>,
    consumer_gone: bool,
}

impl Reader {
    async fn run<St>(mut self, mut stream: St) -> ReaderOutput
    where
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let exit = loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break ReaderExit::Cancelled,
                next = stream.next() => next,
            };

            let message = match next {
                None => {
                    break ReaderExit::TransportLost(GatewayError::Transport(
                        "connection ended without a close frame".to_string(),
                    ))
                }
                Some(Err(e)) => break ReaderExit::TransportLost(e.into()),
                Some(Ok(Message::Close(frame))) => {
                    let status = frame.map_or_else(
                        || CloseStatus::abnormal("close frame without status"),
                        |f| CloseStatus::new(u16::from(f.code), f.reason.as_str()),
                    );
                    debug!(code = status.code, "server closed the connection");
                    break ReaderExit::ServerClosed(status);
                }
                Some(Ok(message)) => message,
            };

            if self.corrupted.is_some() || self.closing.is_cancelled() {
                trace!("ignoring frame while closing");
                continue;
            }

            let Some(message) = TransportMessage::from_ws(message) else {
                continue;
            };

            match self.classifier.classify(message) {
                Ok(Classified::Partial) => {}
                Ok(Classified::Payload(payload)) => {
                    if self.dispatch(payload).await.is_break() {
                        break ReaderExit::Cancelled;
                    }
                }
                Err(err) if !err.terminates_connection() => {
                    warn!(error = %err, "dropping malformed payload");
                }
                Err(err) => {
                    error!(error = %err, "compressed stream corrupted, closing connection");
                    self.heartbeat = None;
                    let status = CloseStatus::new(codes::INVALID_PAYLOAD, "stream corrupted");
                    self.corrupted = Some(err);
                    if self.request_close(status).await.is_break() {
                        break ReaderExit::Cancelled;
                    }
                }
            }
        };

        self.heartbeat = None;
        let exit = match self.corrupted.take() {
            Some(err) => ReaderExit::Corrupted(err),
            None => exit,
        };
        debug!(?exit, phase = ?self.session.phase(), "reader stopped");

        ReaderOutput {
            exit,
            session: self.session,
            inbound: self.inbound,
        }
    }

    async fn dispatch(&mut self, payload: DecodedPayload) -> ControlFlow<()> {
        let actions = match self.session.handle(payload) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(error = %e, "dropping malformed payload");
                return ControlFlow::Continue(());
            }
        };

        for action in actions {
            match action {
                SessionAction::Deliver(payload) => {
                    if self.consumer_gone {
                        continue;
                    }
                    let delivered = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return ControlFlow::Break(()),
                        result = self.inbound.emit(payload) => result,
                    };
                    if delivered.is_err() {
                        info!("inbound receiver dropped, closing connection");
                        self.consumer_gone = true;
                        self.request_close(CloseStatus::new(codes::NORMAL, ""))
                            .await?;
                    }
                }
                SessionAction::Send(text) => {
                    let sent = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return ControlFlow::Break(()),
                        result = self.protocol.send(text) => result,
                    };
                    if sent.is_err() {
                        debug!("outbound channel closed, protocol payload dropped");
                    }
                }
                SessionAction::StartHeartbeat(interval) => {
                    self.heartbeat = Some(start_heartbeat_task(
                        interval,
                        self.session.sequence(),
                        self.protocol.with_origin("heartbeat"),
                        &self.heartbeat_config,
                    ));
                }
                SessionAction::HeartbeatAcked => {
                    if let Some(heartbeat) = &self.heartbeat {
                        heartbeat.ack_received();
                    }
                }
            }
        }

        ControlFlow::Continue(())
    }

    async fn request_close(&self, status: CloseStatus) -> ControlFlow<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => ControlFlow::Break(()),
            result = self.protocol.close(status) => {
                if result.is_err() {
                    debug!("outbound channel already closed");
                }
                ControlFlow::Continue(())
            }
        }
    }
}

#[derive(Debug)]
enum WriterExit {
    LocalClose(CloseStatus),
    Failed(GatewayError),
    Cancelled,
}

struct Writer {
    outbound: OutboundQueue,
    cancel: CancellationToken,
    closing: CancellationToken,
    close_timeout: Duration,
}

impl Writer {
    async fn run<Si>(mut self, mut sink: Si) -> WriterExit
    where
        Si: Sink<Message, Error = WsError> + Unpin,
    {
        let exit = loop {
            let command = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break WriterExit::Cancelled,
                command = self.outbound.next() => command,
            };

            match command {
                Some(OutboundCommand::Send(text)) => {
                    let result = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break WriterExit::Cancelled,
                        result = sink.send(Message::Text(text.into())) => result,
                    };
                    if let Err(e) = result {
                        break WriterExit::Failed(e.into());
                    }
                }
                Some(OutboundCommand::Close(status)) => break WriterExit::LocalClose(status),
                Some(OutboundCommand::Fail(reason)) => {
                    warn!(%reason, "outbound producer failed, closing connection");
                    break WriterExit::LocalClose(CloseStatus::new(codes::INTERNAL_ERROR, reason));
                }
                None => {
                    self.cancel.cancelled().await;
                    break WriterExit::Cancelled;
                }
            }
        };

        self.outbound.close();

        match &exit {
            WriterExit::LocalClose(status) => {
                self.closing.cancel();
                debug!(code = status.code, "sending close frame");
                let handshake = async {
                    if let Err(e) = sink.send(Message::Close(Some(close_frame(status)))).await {
                        debug!(error = %e, "failed to send close frame");
                        return;
                    }
                    self.cancel.cancelled().await;
                };
                if timeout(self.close_timeout, handshake).await.is_err() {
                    warn!(timeout = ?self.close_timeout, "close handshake timed out");
                }
            }
            WriterExit::Cancelled => {
                let _ = timeout(self.close_timeout, sink.close()).await;
            }
            WriterExit::Failed(e) => debug!(error = %e, "writer failed"),
        }

        self.cancel.cancel();
        exit
    }
}

fn close_frame(status: &CloseStatus) -> CloseFrame {
    let code = match status.code {
        1005 | 1006 | 1015 => CloseCode::Normal,
        code => CloseCode::from(code),
    };

    let mut end = status.reason.len().min(MAX_CLOSE_REASON);
    while !status.reason.is_char_boundary(end) {
        end -= 1;
    }

    CloseFrame {
        code,
        reason: status.reason[..end].to_string().into(),
    }
}
