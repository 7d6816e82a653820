//! Keyed snapshots of `RunState`, last write wins per run.

use mender_common::RunId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;

use crate::pipeline::state::RunState;

/// What happens to a snapshot once its run reaches `Done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep terminal snapshots for inspection. Memory grows with every run
    /// until the process exits.
    #[default]
    Keep,
    /// Drop the snapshot and the retained terminal event once a run concludes.
    RemoveOnTerminal,
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::RemoveOnTerminal => write!(f, "remove_on_terminal"),
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "remove_on_terminal" | "remove-on-terminal" => Ok(Self::RemoveOnTerminal),
            _ => anyhow::bail!(
                "Invalid checkpoint retention '{}'. Valid values: keep, remove_on_terminal",
                s
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct CheckpointStore {
    snapshots: RwLock<HashMap<RunId, RunState>>,
    retention: RetentionPolicy,
}

impl CheckpointStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub async fn put(&self, state: &RunState) {
        self.snapshots
            .write()
            .await
            .insert(state.run_id, state.clone());
    }

    pub async fn get(&self, run_id: RunId) -> Option<RunState> {
        self.snapshots.read().await.get(&run_id).cloned()
    }

    pub async fn remove(&self, run_id: RunId) -> Option<RunState> {
        self.snapshots.write().await.remove(&run_id)
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Terminal-state hook: store the final snapshot or drop it, per policy.
    pub async fn conclude(&self, state: &RunState) {
        match self.retention {
            RetentionPolicy::Keep => self.put(state).await,
            RetentionPolicy::RemoveOnTerminal => {
                self.remove(state.run_id).await;
            }
        }
    }
}
