//! Ordered per-run delivery of lifecycle events.
//!
//! Each live run owns a `broadcast` channel. Publishing a terminal event
//! closes that channel and keeps the event, so an observer that attaches
//! late sees only the final snapshot.

use futures::Stream;
use mender_common::{RunId, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{Mutex, broadcast};

use crate::pipeline::state::RunProjection;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    AgentStart {
        agent: Stage,
        message: String,
        iteration: u32,
    },
    AgentComplete {
        agent: Stage,
        message: String,
        iteration: u32,
        result: serde_json::Value,
    },
    WorkflowComplete {
        message: String,
        result: Box<RunProjection>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<Stage>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Box<RunProjection>>,
    },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowComplete { .. } | Self::Error { .. })
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentComplete { .. } => "agent_complete",
            Self::WorkflowComplete { .. } => "workflow_complete",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Default)]
struct Channels {
    live: HashMap<RunId, broadcast::Sender<PipelineEvent>>,
    finished: HashMap<RunId, PipelineEvent>,
}

pub struct EventEmitter {
    channels: Mutex<Channels>,
    capacity: usize,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(Channels::default()),
            capacity: capacity.max(1),
        }
    }

    /// Open (or reopen, on resume) the live channel for a run.
    pub async fn open(&self, run_id: RunId) {
        let mut channels = self.channels.lock().await;
        channels.finished.remove(&run_id);
        channels
            .live
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    pub async fn publish(&self, run_id: RunId, event: PipelineEvent) {
        let mut channels = self.channels.lock().await;
        if event.is_terminal() {
            if let Some(tx) = channels.live.remove(&run_id) {
                let _ = tx.send(event.clone()); // Ignore error if no receivers
            }
            channels.finished.insert(run_id, event);
        } else if let Some(tx) = channels.live.get(&run_id) {
            let _ = tx.send(event);
        } else {
            tracing::debug!(%run_id, kind = event.kind(), "dropping event for closed run");
        }
    }

    /// Attach an observer. `None` when the run is unknown.
    pub async fn subscribe(&self, run_id: RunId) -> Option<Subscription> {
        let channels = self.channels.lock().await;
        if let Some(tx) = channels.live.get(&run_id) {
            return Some(Subscription::live(run_id, tx.subscribe()));
        }
        channels
            .finished
            .get(&run_id)
            .cloned()
            .map(|event| Subscription::finished(run_id, event))
    }

    pub async fn forget(&self, run_id: RunId) {
        let mut channels = self.channels.lock().await;
        channels.live.remove(&run_id);
        channels.finished.remove(&run_id);
    }

    pub async fn is_live(&self, run_id: RunId) -> bool {
        self.channels.lock().await.live.contains_key(&run_id)
    }
}

/// One observer's view of a run's events, ending after the terminal event.
pub struct Subscription {
    run_id: RunId,
    rx: Option<broadcast::Receiver<PipelineEvent>>,
    pending: Option<PipelineEvent>,
    done: bool,
}

impl Subscription {
    fn live(run_id: RunId, rx: broadcast::Receiver<PipelineEvent>) -> Self {
        Self {
            run_id,
            rx: Some(rx),
            pending: None,
            done: false,
        }
    }

    fn finished(run_id: RunId, event: PipelineEvent) -> Self {
        Self {
            run_id,
            rx: None,
            pending: Some(event),
            done: false,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub async fn next(&mut self) -> Option<PipelineEvent> {
        if self.done {
            return None;
        }
        if let Some(event) = self.pending.take() {
            self.done = true;
            return Some(event);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_terminal() {
                        self.done = true;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(run_id = %self.run_id, skipped, "observer lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = PipelineEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}
