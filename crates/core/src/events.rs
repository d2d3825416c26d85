use crate::state::State;
use crate::types::StepKind;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

/// Live notification about a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A node is about to run with the state it inherited
    Start {
        kind: StepKind,
        identifier: String,
        state: State,
    },
    /// A node exhausted its attempts
    Error { identifier: String, message: String },
    /// The run settled; always the last event of an invocation
    Stop,
}

impl ProgressEvent {
    pub fn is_stop(&self) -> bool {
        matches!(self, ProgressEvent::Stop)
    }
}

/// Destination for progress events.
///
/// `publish` must not block and must not wait on the consumer. Delivery is
/// best effort: a sink whose consumer went away drops events silently.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Sink backed by an unbounded mpsc channel; one consumer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Progress receiver dropped, discarding event");
        }
    }
}

/// Sink fanning events out to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest events instead of slowing the run.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl ProgressSink for BroadcastSink {
    fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("No progress subscribers, discarding event");
        }
    }
}

/// Sink keeping every event in memory, in publish order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
