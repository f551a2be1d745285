//! Event forwarder
//!
//! Relays one turn's agent stream onto the engine's bounded queue.
//! `Init` and `Done` wait for room; everything else is dropped when the
//! queue is full. Order is never changed.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::agent::{AgentEvent, EventStream};

/// Capacity of the engine's event queue
pub const DEFAULT_FORWARD_CAPACITY: usize = 100;

/// Why forwarding stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    /// The agent stream ended
    ProducerClosed,
    /// Nobody is listening any more
    ConsumerClosed,
    Cancelled,
}

/// What one forwarding run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: usize,
    pub dropped: usize,
    pub end: ForwardEnd,
}

/// Forward until the producer ends, the consumer closes or `cancel` fires
pub async fn forward_events(
    mut rx: EventStream,
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> ForwardStats {
    let mut forwarded = 0;
    let mut dropped = 0;

    let end = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break ForwardEnd::Cancelled,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break ForwardEnd::ProducerClosed,
            },
        };

        if event.is_critical() {
            let kind = event.kind();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break ForwardEnd::Cancelled,
                result = tx.send(event) => {
                    if result.is_err() {
                        break ForwardEnd::ConsumerClosed;
                    }
                    trace!(kind, "forward_events: delivered critical event");
                    forwarded += 1;
                }
            }
        } else {
            match tx.try_send(event) {
                Ok(()) => forwarded += 1,
                Err(mpsc::error::TrySendError::Full(event)) => {
                    trace!(kind = event.kind(), "forward_events: queue full, dropping");
                    dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break ForwardEnd::ConsumerClosed,
            }
        }
    };

    debug!(forwarded, dropped, ?end, "forward_events: finished");
    ForwardStats { forwarded, dropped, end }
}

/// Run [`forward_events`] on its own task
pub fn spawn_forwarder(
    rx: EventStream,
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> JoinHandle<ForwardStats> {
    tokio::spawn(forward_events(rx, tx, cancel))
}
