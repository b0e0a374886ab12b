//! Heartbeat task.
//!
//! Started when hello names an interval. Each tick enqueues an op 1 payload
//! carrying the last sequence number on the protocol side of the outbound
//! channel. Heartbeat ACKs reset the missed counter; once too many beats go
//! unacknowledged the connection is closed as resumable so a fresh one can
//! take over.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatewire_proto::close::codes;
use gatewire_proto::{CloseStatus, GatewayCommand};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::channel::OutboundSender;
use crate::session::SequenceCell;

/// Heartbeat behaviour. The interval itself comes from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Delay the first beat by a random fraction of the interval.
    pub jitter: bool,
    /// Unacknowledged beats tolerated before the connection is considered dead.
    ///
    /// ACKs are read by the same task that delivers payloads, so while the
    /// inbound channel is full no ACK is seen. A consumer that stalls for this
    /// many intervals gets the connection closed with 4000 (resumable). Raise
    /// it, or the inbound capacity, for consumers with slow handlers.
    pub max_missed_acks: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            jitter: true,
            max_missed_acks: 2,
        }
    }
}

/// Handle for controlling the heartbeat task. Dropping it stops the task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    running: Arc<AtomicBool>,
    missed_acks: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            missed_acks: Arc::new(AtomicU32::new(0)),
            task: None,
        }
    }

    /// Whether the task is still beating.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Beats sent since the last ACK.
    #[must_use]
    pub fn missed_acks(&self) -> u32 {
        self.missed_acks.load(Ordering::SeqCst)
    }

    /// Record a heartbeat ACK.
    pub fn ack_received(&self) {
        self.missed_acks.store(0, Ordering::SeqCst);
    }

    /// Stop the task.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn first_beat_delay(interval: Duration, jitter: bool) -> Duration {
    if jitter {
        interval.mul_f64(rand::random::<f64>())
    } else {
        interval
    }
}

/// Start beating every `interval` on `outbound`.
pub fn start_heartbeat_task(
    interval: Duration,
    sequence: Arc<SequenceCell>,
    outbound: OutboundSender,
    config: &HeartbeatConfig,
) -> HeartbeatHandle {
    // tokio intervals cannot have a zero period.
    let interval = interval.max(Duration::from_millis(1));
    let mut handle = HeartbeatHandle::new();
    handle.running.store(true, Ordering::SeqCst);

    let running = Arc::clone(&handle.running);
    let missed_acks = Arc::clone(&handle.missed_acks);
    let max_missed = config.max_missed_acks.max(1);
    let first = first_beat_delay(interval, config.jitter);
    debug!(?interval, ?first, "heartbeat started");

    handle.task = Some(tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + first, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            timer.tick().await;

            if !running.load(Ordering::SeqCst) {
                break;
            }

            let missed = missed_acks.load(Ordering::SeqCst);
            if missed >= max_missed {
                warn!(missed, "heartbeat not acknowledged, closing connection");
                let _ = outbound
                    .close(CloseStatus::new(codes::UNKNOWN_ERROR, "heartbeat ack timeout"))
                    .await;
                break;
            }

            let seq = sequence.get();
            let payload = match GatewayCommand::heartbeat(seq).to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode heartbeat");
                    break;
                }
            };

            if outbound.send(payload).await.is_err() {
                break;
            }
            trace!(?seq, "heartbeat enqueued");
            missed_acks.fetch_add(1, Ordering::SeqCst);
        }

        running.store(false, Ordering::SeqCst);
    }));

    handle
}
