//! The record threaded through one pipeline execution.

use chrono::{DateTime, Utc};
use mender_common::{Edit, Finding, Language, RunId, Stage, ValidationResult};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::InvariantViolation;

/// Router state. While the run is live it names the next stage to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Scanning,
    Fixing,
    Validating,
    Done,
}

impl Phase {
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Scanner => Self::Scanning,
            Stage::Fixer => Self::Fixing,
            Stage::Validator => Self::Validating,
        }
    }

    /// The stage executed in this phase, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Scanning => Some(Stage::Scanner),
            Self::Fixing => Some(Stage::Fixer),
            Self::Validating => Some(Stage::Validator),
            Self::Start | Self::Done => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Scanning => "scanning",
            Self::Fixing => "fixing",
            Self::Validating => "validating",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    CollaboratorUnavailable,
    InternalInvariantViolation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::CollaboratorUnavailable => "collaborator_unavailable",
            Self::InternalInvariantViolation => "internal_invariant_violation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} failed ({}): {}", stage, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// How a run reached `Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The scan found nothing to fix.
    Clean,
    Approved,
    /// Best-effort result: the validator never approved within the ceiling.
    IterationLimitReached,
    Failed(FailureCause),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Clean | Self::Approved | Self::IterationLimitReached
        )
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn workflow_status(&self) -> &'static str {
        match self {
            Self::Clean | Self::Approved => "completed",
            Self::IterationLimitReached => "completed_with_warnings",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Clean => "No errors found in code!".to_string(),
            Self::Approved => "Code successfully debugged and validated!".to_string(),
            Self::IterationLimitReached => {
                "Code fixed (validation incomplete: iteration limit reached)".to_string()
            }
            Self::Failed(cause) => format!("Workflow failed: {cause}"),
            Self::Cancelled => "Workflow cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Completed,
    Failed,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub kind: HistoryKind,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub code: String,
    pub language: Language,
    pub context: Option<String>,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub changes: Vec<Edit>,
    pub current_code: String,
    pub validation: Option<ValidationResult>,
    /// Scanner's 0-10 quality estimate for the code it last saw.
    pub quality_score: Option<f64>,
    pub explanation: Option<String>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub phase: Phase,
    pub outcome: Option<Outcome>,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(
        run_id: RunId,
        code: String,
        language: Language,
        context: Option<String>,
        max_iterations: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            current_code: code.clone(),
            code,
            language,
            context,
            errors: Vec::new(),
            warnings: Vec::new(),
            changes: Vec::new(),
            validation: None,
            quality_score: None,
            explanation: None,
            iteration: 0,
            max_iterations,
            phase: Phase::Start,
            outcome: None,
            history: Vec::new(),
            created_at,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Number of stage invocations recorded so far.
    pub fn stage_invocations(&self) -> usize {
        self.history.iter().filter(|e| e.stage.is_some()).count()
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.created_at).num_milliseconds().max(0))
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.iteration > self.max_iterations {
            return Err(InvariantViolation(format!(
                "iteration {} exceeds max_iterations {}",
                self.iteration, self.max_iterations
            )));
        }
        if self.current_code.is_empty() {
            return Err(InvariantViolation("current_code is empty".to_string()));
        }
        if (self.phase == Phase::Done) != self.outcome.is_some() {
            return Err(InvariantViolation(format!(
                "phase {} inconsistent with outcome {:?}",
                self.phase, self.outcome
            )));
        }
        Ok(())
    }

    pub fn projection(&self) -> RunProjection {
        RunProjection::from_state(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub errors_found: usize,
    pub errors_fixed: usize,
    pub warnings_found: usize,
    pub validation_score: f64,
    pub code_quality: f64,
}

/// The terminal (or in-progress) view of a run handed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProjection {
    pub run_id: RunId,
    pub workflow_status: String,
    pub success: bool,
    pub message: String,
    pub original_code: String,
    pub final_code: String,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub changes: Vec<Edit>,
    pub validation: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub elapsed_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
    pub history: Vec<HistoryEntry>,
    pub summary: RunSummary,
}

impl RunProjection {
    pub fn from_state(state: &RunState) -> Self {
        let (workflow_status, success, message) = match &state.outcome {
            Some(outcome) => (
                outcome.workflow_status().to_string(),
                outcome.is_success(),
                outcome.message(),
            ),
            None => (
                "running".to_string(),
                false,
                format!("Run in progress ({})", state.phase),
            ),
        };

        Self {
            run_id: state.run_id,
            workflow_status,
            success,
            message,
            original_code: state.code.clone(),
            final_code: state.current_code.clone(),
            language: state.language,
            context: state.context.clone(),
            errors: state.errors.clone(),
            warnings: state.warnings.clone(),
            changes: state.changes.clone(),
            validation: state.validation.clone(),
            explanation: state.explanation.clone(),
            iteration: state.iteration,
            max_iterations: state.max_iterations,
            elapsed_ms: state.elapsed_ms(),
            failure: state.outcome.as_ref().and_then(|o| o.failure()).cloned(),
            history: state.history.clone(),
            summary: RunSummary {
                errors_found: state.errors.len(),
                errors_fixed: state.changes.len(),
                warnings_found: state.warnings.len(),
                validation_score: state.validation.as_ref().map_or(0.0, |v| v.confidence),
                code_quality: state.quality_score.unwrap_or(0.0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(code: &str, max: u32) -> RunState {
        RunState::new(
            RunId::new(),
            code.to_string(),
            Language::Python,
            None,
            max,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_state_starts_with_current_code_equal_to_code() {
        let state = fresh("print('ok')", 3);
        assert_eq!(state.current_code, state.code);
        assert_eq!(state.phase, Phase::Start);
        assert_eq!(state.iteration, 0);
        assert!(state.validation.is_none());
        assert!(state.history.is_empty());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_invariants_catch_iteration_overflow() {
        let mut state = fresh("x = 1", 2);
        state.iteration = 3;
        let err = state.check_invariants().unwrap_err();
        assert!(err.0.contains("exceeds max_iterations"));
    }

    #[test]
    fn test_invariants_catch_empty_current_code() {
        let mut state = fresh("x = 1", 2);
        state.current_code.clear();
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_invariants_catch_done_without_outcome() {
        let mut state = fresh("x = 1", 2);
        state.phase = Phase::Done;
        assert!(state.check_invariants().is_err());
        state.outcome = Some(Outcome::Clean);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_phase_stage_mapping() {
        for stage in [Stage::Scanner, Stage::Fixer, Stage::Validator] {
            assert_eq!(Phase::for_stage(stage).stage(), Some(stage));
        }
        assert_eq!(Phase::Start.stage(), None);
        assert_eq!(Phase::Done.stage(), None);
    }

    #[test]
    fn test_outcome_workflow_status() {
        assert_eq!(Outcome::Approved.workflow_status(), "completed");
        assert_eq!(
            Outcome::IterationLimitReached.workflow_status(),
            "completed_with_warnings"
        );
        assert!(Outcome::IterationLimitReached.is_success());
        assert!(!Outcome::Cancelled.is_success());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = Outcome::Failed(FailureCause {
            stage: Some(Stage::Fixer),
            kind: FailureKind::CollaboratorUnavailable,
            message: "timed out".into(),
        });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["stage"], "Fixer");
        assert_eq!(value["kind"], "collaborator_unavailable");
    }

    #[test]
    fn test_projection_of_live_run() {
        let state = fresh("x = 1", 3);
        let projection = state.projection();
        assert_eq!(projection.workflow_status, "running");
        assert!(!projection.success);
        assert_eq!(projection.final_code, "x = 1");
        assert!(projection.elapsed_ms.is_none());
    }

    #[test]
    fn test_projection_summary_counts() {
        let mut state = fresh("x = 1", 3);
        state.errors = vec![Finding::error("E1", "NameError", "b undefined")];
        state.warnings = vec![
            Finding::warning("W1", "Style", "long line"),
            Finding::warning("W2", "Style", "unused"),
        ];
        state.quality_score = Some(4.5);
        state.validation = Some(ValidationResult::approved(0.9));
        state.phase = Phase::Done;
        state.outcome = Some(Outcome::Approved);
        state.finished_at = Some(state.created_at + chrono::Duration::milliseconds(1500));

        let projection = state.projection();
        assert_eq!(projection.summary.errors_found, 1);
        assert_eq!(projection.summary.warnings_found, 2);
        assert_eq!(projection.summary.validation_score, 0.9);
        assert_eq!(projection.summary.code_quality, 4.5);
        assert_eq!(projection.elapsed_ms, Some(1500));
        assert!(projection.success);
    }
}
