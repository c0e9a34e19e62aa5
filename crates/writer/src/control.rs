//! Messages that cross from producer threads to the loop thread.
//!
//! Payloads travel over the write queue; everything that must mutate the
//! registry or wait for the loop travels over the control channel. Only
//! control messages wake the loop; queued payloads are picked up on the next
//! drain, at the latest when the backoff timer fires.

use crate::registry::{StreamCallback, StreamId};
use tokio::sync::{mpsc, oneshot};

/// One pending write, consumed exactly once by the drain step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub(crate) stream: StreamId,
    pub(crate) payload: String,
}

pub(crate) type QueueSender = mpsc::UnboundedSender<QueueEntry>;
pub(crate) type QueueReceiver = mpsc::UnboundedReceiver<QueueEntry>;

/// Work that has to run on the loop thread.
pub(crate) enum Control {
    Open { name: String, on_event: StreamCallback },
    Close { stream: StreamId },
    Exists { stream: StreamId, reply: oneshot::Sender<bool> },
    Stop { ack: oneshot::Sender<()> },
}

impl Control {
    pub(crate) const fn label(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Exists { .. } => "exists",
            Self::Stop { .. } => "stop",
        }
    }
}

pub(crate) type ControlSender = mpsc::UnboundedSender<Control>;
pub(crate) type ControlReceiver = mpsc::UnboundedReceiver<Control>;

pub(crate) fn queue() -> (QueueSender, QueueReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn control() -> (ControlSender, ControlReceiver) {
    mpsc::unbounded_channel()
}
