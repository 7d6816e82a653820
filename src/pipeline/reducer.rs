//! Pure merge of stage results into `RunState`.
//!
//! | field                    | policy                   |
//! |--------------------------|--------------------------|
//! | errors, warnings         | replace (Scanner)        |
//! | quality_score            | replace (Scanner)        |
//! | changes, explanation     | replace (Fixer)          |
//! | current_code             | replace (Fixer only)     |
//! | validation               | replace (Validator)      |
//! | history                  | append one entry per call|
//! | phase, iteration         | untouched                |
//!
//! Timestamps come from the update itself so the same inputs always produce
//! the same state.

use chrono::{DateTime, Utc};
use mender_common::Stage;
use serde::{Deserialize, Serialize};

use crate::errors::InvariantViolation;
use crate::pipeline::state::{
    FailureKind, HistoryEntry, HistoryKind, Outcome, Phase, RunState,
};
use crate::stages::{StageOutput, StagePayload};

/// A stage failure after the orchestrator has given up retrying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageUpdate {
    Output(StageOutput),
    Failure(StageFailure),
}

pub fn reduce(
    state: &RunState,
    stage: Stage,
    update: &StageUpdate,
) -> Result<RunState, InvariantViolation> {
    if state.is_terminal() {
        return Err(InvariantViolation(format!(
            "{} result merged into a finished run",
            stage
        )));
    }

    let mut next = state.clone();
    match update {
        StageUpdate::Output(output) => {
            if output.payload.stage() != stage {
                return Err(InvariantViolation(format!(
                    "{} payload merged as {} output",
                    output.payload.stage(),
                    stage
                )));
            }
            match &output.payload {
                StagePayload::Scan(report) => {
                    next.errors = report.errors.clone();
                    next.warnings = report.warnings.clone();
                    next.quality_score = report.quality_score;
                }
                StagePayload::Fix(report) => {
                    if report.fixed_code.is_empty() {
                        return Err(InvariantViolation(
                            "Fixer output has empty fixed_code".to_string(),
                        ));
                    }
                    next.current_code = report.fixed_code.clone();
                    next.changes = report.changes.clone();
                    next.explanation = Some(report.explanation.clone())
                        .filter(|e| !e.is_empty());
                }
                StagePayload::Validate(result) => {
                    next.validation = Some(result.clone().clamped());
                }
            }
            next.history.push(HistoryEntry {
                stage: Some(stage),
                kind: HistoryKind::Completed,
                timestamp: output.completed_at,
                summary: output.payload.summary(),
            });
        }
        StageUpdate::Failure(failure) => {
            next.history.push(HistoryEntry {
                stage: Some(stage),
                kind: HistoryKind::Failed,
                timestamp: failure.at,
                summary: format!("{}: {}", failure.kind, failure.message),
            });
        }
    }
    Ok(next)
}

/// Close the run: sets `Done`, the outcome and appends the single `finished` entry.
pub fn conclude(
    state: &RunState,
    outcome: Outcome,
    at: DateTime<Utc>,
) -> Result<RunState, InvariantViolation> {
    if state.is_terminal() {
        return Err(InvariantViolation(format!(
            "run {} concluded twice",
            state.run_id
        )));
    }

    let mut next = state.clone();
    next.history.push(HistoryEntry {
        stage: None,
        kind: HistoryKind::Finished,
        timestamp: at,
        summary: outcome.message(),
    });
    next.phase = Phase::Done;
    next.outcome = Some(outcome);
    next.finished_at = Some(at);
    Ok(next)
}
