//! Typed error hierarchy for Mender.
//!
//! Three enums cover the three layers:
//! - `CollaboratorError` - the external reasoning service call itself
//! - `StageError` - what a stage adapter reports to the orchestrator
//! - `WorkflowError` - run-level failures surfaced to callers
//!
//! `InvariantViolation` is kept separate because the reducer and router are
//! pure and must not depend on the adapter or workflow layers.

use mender_common::{RunId, Stage};
use std::time::Duration;
use thiserror::Error;

/// Errors from a single call to the external reasoning service.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator API key not configured (set {env_var})")]
    NotConfigured { env_var: String },

    #[error("Collaborator request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Collaborator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Collaborator response had no message content")]
    EmptyResponse,
}

/// Failures a stage adapter can report.
#[derive(Debug, Error)]
pub enum StageError {
    /// The projection handed to the adapter is unusable. Fatal for the run.
    #[error("Invalid input for {stage}: {message}")]
    InvalidInput { stage: Stage, message: String },

    /// Network failure, timeout or service error. Retryable.
    #[error("{stage} collaborator unavailable: {message}")]
    CollaboratorUnavailable { stage: Stage, message: String },

    /// The collaborator answered, but neither parse strategy produced the schema.
    #[error("{stage} returned a malformed response: {message}")]
    MalformedResponse { stage: Stage, message: String },
}

impl StageError {
    pub fn invalid_input(stage: Stage, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage,
            message: message.into(),
        }
    }

    pub fn unavailable(stage: Stage, message: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            stage,
            message: message.into(),
        }
    }

    pub fn malformed(stage: Stage, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            stage,
            message: message.into(),
        }
    }

    pub fn timed_out(stage: Stage, after: Duration) -> Self {
        Self::unavailable(stage, format!("timed out after {}s", after.as_secs_f64()))
    }

    pub fn from_collaborator(stage: Stage, err: CollaboratorError) -> Self {
        Self::unavailable(stage, err.to_string())
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidInput { stage, .. }
            | Self::CollaboratorUnavailable { stage, .. }
            | Self::MalformedResponse { stage, .. } => *stage,
        }
    }

    /// Whether the orchestrator may try the same stage again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidInput { .. })
    }
}

/// A broken internal guarantee. Never expected in correct code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Internal invariant violated: {0}")]
pub struct InvariantViolation(pub String);

/// Run-level errors surfaced to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Run {run_id} not found")]
    RunNotFound { run_id: RunId },

    #[error("Run {run_id} is already active")]
    RunAlreadyActive { run_id: RunId },

    #[error("Run {run_id} has already finished")]
    RunAlreadyFinished { run_id: RunId },

    #[error("Run {run_id} aborted: {source}")]
    Invariant {
        run_id: RunId,
        #[source]
        source: InvariantViolation,
    },

    #[error("Run {run_id} task failed: {message}")]
    TaskFailed { run_id: RunId, message: String },
}
