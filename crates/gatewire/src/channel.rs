//! Dual-channel multiplexer.
//!
//! ```text
//!                    ┌──────────────┐
//! consumer ─ send ─► │              │
//!                    │ outbound mpsc├─► writer task ─► WebSocket
//! protocol ─ send ─► │   (bounded)  │
//!                    └──────────────┘
//! WebSocket ─► reader task ─► inbound mpsc (bounded) ─► consumer
//! ```
//!
//! Both directions are bounded `tokio::sync::mpsc` channels, so a slow side
//! applies backpressure instead of dropping. The outbound channel has two
//! producer handles sharing one FIFO: whatever is enqueued first is sent first.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use gatewire_proto::close::codes;
use gatewire_proto::CloseStatus;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{GatewayError, GatewayResult};
use crate::frame::DecodedPayload;

/// Default capacity of each direction.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Item delivered to the consumer.
pub type InboundItem = Result<DecodedPayload, GatewayError>;

/// Instruction for the connection writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Send a text payload.
    Send(String),
    /// Close the connection with this status. Completes the channel.
    Close(CloseStatus),
    /// The producer failed. Closes the connection with an error status.
    Fail(String),
}

/// Producer handle for the outbound channel.
///
/// Cheaply cloneable; every clone feeds the same ordered queue.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundCommand>,
    origin: &'static str,
}

impl OutboundSender {
    /// A handle on the same queue tagged with another origin for logging.
    #[must_use]
    pub fn with_origin(&self, origin: &'static str) -> Self {
        Self {
            tx: self.tx.clone(),
            origin,
        }
    }

    /// Enqueue a text payload, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ChannelClosed`] once the connection has closed.
    pub async fn send(&self, payload: impl Into<String>) -> GatewayResult<()> {
        let payload = payload.into();
        trace!(origin = self.origin, len = payload.len(), "enqueue outbound payload");
        self.push(OutboundCommand::Send(payload)).await
    }

    /// Complete the outbound channel; the connection closes normally.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ChannelClosed`] if the connection is already closed.
    pub async fn complete(&self) -> GatewayResult<()> {
        self.close(CloseStatus::new(codes::NORMAL, "")).await
    }

    /// Terminate the outbound channel with an error.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ChannelClosed`] if the connection is already closed.
    pub async fn fail(&self, reason: impl Into<String>) -> GatewayResult<()> {
        self.push(OutboundCommand::Fail(reason.into())).await
    }

    /// Close the connection with a specific status.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ChannelClosed`] if the connection is already closed.
    pub async fn close(&self, status: CloseStatus) -> GatewayResult<()> {
        self.push(OutboundCommand::Close(status)).await
    }

    /// Whether the connection stopped accepting outbound payloads.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn push(&self, command: OutboundCommand) -> GatewayResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

/// Consumer side of the outbound channel, owned by the connection writer.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<OutboundCommand>,
}

impl OutboundQueue {
    /// Next command in enqueue order, `None` when every producer is gone.
    pub async fn next(&mut self) -> Option<OutboundCommand> {
        self.rx.recv().await
    }

    /// Stop accepting commands. Already-queued commands are discarded.
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

/// Producer side of the inbound channel, owned by the connection reader.
#[derive(Debug)]
pub struct InboundSender {
    tx: Option<mpsc::Sender<InboundItem>>,
}

impl InboundSender {
    /// Deliver a payload to the consumer, waiting while the channel is full.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ChannelClosed`] if the channel was terminated or the
    /// consumer dropped its receiver.
    pub async fn emit(&self, payload: DecodedPayload) -> GatewayResult<()> {
        let tx = self.tx.as_ref().ok_or(GatewayError::ChannelClosed)?;
        tx.send(Ok(payload))
            .await
            .map_err(|_| GatewayError::ChannelClosed)
    }

    /// Terminate the channel with an error. Later calls are no-ops.
    pub async fn error(&mut self, err: GatewayError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err)).await;
        }
    }

    /// Terminate the channel without error. Later calls are no-ops.
    pub fn complete(&mut self) {
        self.tx = None;
    }
}

/// Consumer side of the inbound channel.
///
/// Yields payloads in arrival order, then either one `Err` (error termination)
/// or `None` (completion).
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::Receiver<InboundItem>,
}

impl InboundReceiver {
    /// Receive the next item.
    pub async fn recv(&mut self) -> Option<InboundItem> {
        self.rx.recv().await
    }
}

impl Stream for InboundReceiver {
    type Item = InboundItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Ends of the channel pair held by the application.
#[derive(Debug)]
pub struct ConsumerEnds {
    /// Decoded dispatch payloads.
    pub inbound: InboundReceiver,
    /// Consumer-origin outbound payloads.
    pub outbound: OutboundSender,
}

/// Ends of the channel pair held by the connection.
#[derive(Debug)]
pub struct ConnectionEnds {
    /// Delivery to the consumer.
    pub inbound: InboundSender,
    /// Protocol-origin outbound payloads (identify, resume, heartbeat).
    pub protocol: OutboundSender,
    /// Drained by the writer.
    pub outbound: OutboundQueue,
}

/// Create the inbound/outbound channel pair for one connection.
#[must_use]
pub fn exchange(inbound_capacity: usize, outbound_capacity: usize) -> (ConsumerEnds, ConnectionEnds) {
    let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));

    let consumer = OutboundSender {
        tx: outbound_tx,
        origin: "consumer",
    };
    let protocol = consumer.with_origin("protocol");

    (
        ConsumerEnds {
            inbound: InboundReceiver { rx: inbound_rx },
            outbound: consumer,
        },
        ConnectionEnds {
            inbound: InboundSender {
                tx: Some(inbound_tx),
            },
            protocol,
            outbound: OutboundQueue { rx: outbound_rx },
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_outbound_order_across_sources() {
        let (consumer, mut conn) = exchange(4, 8);

        consumer.outbound.send("A").await.expect("send");
        conn.protocol.send("B").await.expect("send");
        consumer.outbound.send("C").await.expect("send");

        let mut sent = Vec::new();
        for _ in 0..3 {
            if let Some(OutboundCommand::Send(p)) = conn.outbound.next().await {
                sent.push(p);
            }
        }
        assert_eq!(sent, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_outbound_backpressure_blocks_instead_of_dropping() {
        let (consumer, mut conn) = exchange(1, 1);

        consumer.outbound.send("first").await.expect("send");
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            consumer.outbound.send("second"),
        )
        .await;
        assert!(blocked.is_err(), "send should wait while the queue is full");

        assert_eq!(
            conn.outbound.next().await,
            Some(OutboundCommand::Send("first".to_string()))
        );
        consumer.outbound.send("second").await.expect("send");
        assert_eq!(
            conn.outbound.next().await,
            Some(OutboundCommand::Send("second".to_string()))
        );
    }

    #[tokio::test]
    async fn test_inbound_emit_waits_for_consumer() {
        let (mut consumer, conn) = exchange(1, 1);
        conn.inbound.emit(DecodedPayload::new("one")).await.expect("emit");

        let mut second = tokio_test::task::spawn(conn.inbound.emit(DecodedPayload::new("two")));
        tokio_test::assert_pending!(second.poll());

        let first = consumer.inbound.recv().await.expect("item").expect("payload");
        assert_eq!(first.as_str(), "one");

        assert!(second.is_woken());
        tokio_test::assert_ready_ok!(second.poll());
    }

    #[tokio::test]
    async fn test_send_after_queue_closed_fails() {
        let (consumer, mut conn) = exchange(1, 4);
        consumer.outbound.send("queued").await.expect("send");

        conn.outbound.close();

        assert!(consumer.outbound.is_closed());
        assert!(matches!(
            consumer.outbound.send("late").await,
            Err(GatewayError::ChannelClosed)
        ));
        assert!(matches!(
            conn.protocol.send("late").await,
            Err(GatewayError::ChannelClosed)
        ));
        assert_eq!(conn.outbound.next().await, None);
    }

    #[tokio::test]
    async fn test_complete_enqueues_normal_close() {
        let (consumer, mut conn) = exchange(1, 4);
        consumer.outbound.complete().await.expect("complete");

        assert_eq!(
            conn.outbound.next().await,
            Some(OutboundCommand::Close(CloseStatus::new(codes::NORMAL, "")))
        );
    }

    #[tokio::test]
    async fn test_fail_enqueues_error() {
        let (consumer, mut conn) = exchange(1, 4);
        consumer.outbound.fail("producer crashed").await.expect("fail");

        assert_eq!(
            conn.outbound.next().await,
            Some(OutboundCommand::Fail("producer crashed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_inbound_payloads_then_completion() {
        let (mut consumer, mut conn) = exchange(4, 1);

        conn.inbound.emit(DecodedPayload::new("one")).await.expect("emit");
        conn.inbound.emit(DecodedPayload::new("two")).await.expect("emit");
        conn.inbound.complete();
        assert!(matches!(
            conn.inbound.emit(DecodedPayload::new("late")).await,
            Err(GatewayError::ChannelClosed)
        ));

        let items: Vec<_> = (&mut consumer.inbound).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().expect("payload").as_str(), "one");
        assert_eq!(items[1].as_ref().expect("payload").as_str(), "two");
    }

    #[tokio::test]
    async fn test_inbound_error_terminates() {
        let (mut consumer, mut conn) = exchange(4, 1);

        conn.inbound
            .error(GatewayError::StreamCorrupted("bad block".to_string()))
            .await;

        assert!(matches!(
            consumer.inbound.recv().await,
            Some(Err(GatewayError::StreamCorrupted(_)))
        ));
        assert!(consumer.inbound.recv().await.is_none());
        assert!(matches!(
            conn.inbound.emit(DecodedPayload::new("late")).await,
            Err(GatewayError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_emit_fails_when_consumer_dropped() {
        let (consumer, conn) = exchange(4, 1);
        drop(consumer.inbound);

        assert!(conn.inbound.emit(DecodedPayload::new("x")).await.is_err());
    }
}
