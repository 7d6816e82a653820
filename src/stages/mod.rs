//! Stage adapters: the uniform wrapper around each collaborator call.
//!
//! | Module         | Purpose                                                  |
//! |----------------|----------------------------------------------------------|
//! | `collaborator` | `Collaborator` trait and the HTTP chat-completions client |
//! | `extract`      | Strict and fallback JSON extraction from responses        |
//! | `prompts`      | Prompt builders for the three stages                      |
//! | `scanner`      | Finds errors and warnings in the current code             |
//! | `fixer`        | Rewrites the current code to address the errors           |
//! | `validator`    | Judges the rewrite against the original                   |
//!
//! Adapters never touch `RunState`. They receive a projection
//! ([`StageInput`]) and return a [`StagePayload`] for the reducer.

pub mod collaborator;
pub mod extract;
pub mod fixer;
pub mod prompts;
pub mod scanner;
pub mod validator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mender_common::{Edit, Finding, Language, Stage, ValidationResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::StageError;
use crate::pipeline::state::RunState;

pub use collaborator::{Collaborator, HttpCollaborator};
pub use fixer::Fixer;
pub use scanner::Scanner;
pub use validator::Validator;

/// The slice of `RunState` a stage is allowed to see.
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    Scan {
        code: String,
        language: Language,
        context: Option<String>,
    },
    Fix {
        code: String,
        language: Language,
        context: Option<String>,
        errors: Vec<Finding>,
    },
    Validate {
        original: String,
        current: String,
        language: Language,
        errors: Vec<Finding>,
        changes: Vec<Edit>,
    },
}

impl StageInput {
    /// Project the state for `stage`. The scanner always sees `current_code`,
    /// so a retry re-analyses the latest rewrite.
    pub fn project(state: &RunState, stage: Stage) -> Self {
        match stage {
            Stage::Scanner => Self::Scan {
                code: state.current_code.clone(),
                language: state.language,
                context: state.context.clone(),
            },
            Stage::Fixer => Self::Fix {
                code: state.current_code.clone(),
                language: state.language,
                context: state.context.clone(),
                errors: state.errors.clone(),
            },
            Stage::Validator => Self::Validate {
                original: state.code.clone(),
                current: state.current_code.clone(),
                language: state.language,
                errors: state.errors.clone(),
                changes: state.changes.clone(),
            },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Scan { .. } => Stage::Scanner,
            Self::Fix { .. } => Stage::Fixer,
            Self::Validate { .. } => Stage::Validator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub summary: String,
}

impl ScanReport {
    pub fn clean() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            quality_score: None,
            summary: String::new(),
        }
    }

    pub fn with_errors(errors: Vec<Finding>) -> Self {
        Self {
            errors,
            ..Self::clean()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixReport {
    pub fixed_code: String,
    pub changes: Vec<Edit>,
    #[serde(default)]
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl FixReport {
    pub fn new(fixed_code: &str, changes: Vec<Edit>) -> Self {
        Self {
            fixed_code: fixed_code.to_string(),
            changes,
            explanation: String::new(),
            confidence: None,
        }
    }
}

/// Stage-specific result with a stable schema the reducer merges blindly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "report")]
pub enum StagePayload {
    Scan(ScanReport),
    Fix(FixReport),
    Validate(ValidationResult),
}

impl StagePayload {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Scan(_) => Stage::Scanner,
            Self::Fix(_) => Stage::Fixer,
            Self::Validate(_) => Stage::Validator,
        }
    }

    /// One-line description used for history entries and event messages.
    pub fn summary(&self) -> String {
        match self {
            Self::Scan(report) => format!(
                "Found {} errors, {} warnings",
                report.errors.len(),
                report.warnings.len()
            ),
            Self::Fix(report) => format!("Applied {} fixes", report.changes.len()),
            Self::Validate(result) => format!("Validation: {}", result.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub payload: StagePayload,
    #[serde(with = "duration_ms")]
    pub execution_time: Duration,
    pub completed_at: DateTime<Utc>,
}

impl StageOutput {
    pub fn new(payload: StagePayload, execution_time: Duration, completed_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            execution_time,
            completed_at,
        }
    }

    /// JSON body carried by `agent_complete` events.
    pub fn to_event_result(&self) -> serde_json::Value {
        let mut value = match &self.payload {
            StagePayload::Scan(r) => serde_json::to_value(r),
            StagePayload::Fix(r) => serde_json::to_value(r),
            StagePayload::Validate(r) => serde_json::to_value(r),
        }
        .unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "execution_time_ms".to_string(),
                serde_json::json!(self.execution_time.as_millis() as u64),
            );
        }
        value
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// A uniform contract over the three collaborator-backed stages.
#[async_trait]
pub trait StageAdapter: Send + Sync {
    fn stage(&self) -> Stage;

    async fn invoke(&self, input: &StageInput) -> Result<StagePayload, StageError>;
}

/// Invoke `adapter` and stamp the result with its execution time.
pub async fn invoke_timed(
    adapter: &dyn StageAdapter,
    input: &StageInput,
) -> Result<StageOutput, StageError> {
    let started = Instant::now();
    let payload = adapter.invoke(input).await?;
    if payload.stage() != adapter.stage() {
        return Err(StageError::malformed(
            adapter.stage(),
            format!("adapter returned a {} payload", payload.stage()),
        ));
    }
    Ok(StageOutput::new(payload, started.elapsed(), Utc::now()))
}

/// The three adapters the orchestrator dispatches to, injected at construction.
#[derive(Clone)]
pub struct StageSet {
    pub scanner: Arc<dyn StageAdapter>,
    pub fixer: Arc<dyn StageAdapter>,
    pub validator: Arc<dyn StageAdapter>,
}

impl StageSet {
    pub fn new(
        scanner: Arc<dyn StageAdapter>,
        fixer: Arc<dyn StageAdapter>,
        validator: Arc<dyn StageAdapter>,
    ) -> Self {
        Self {
            scanner,
            fixer,
            validator,
        }
    }

    /// Adapters backed by a shared collaborator, with per-stage temperatures.
    pub fn from_collaborator(
        collaborator: Arc<dyn Collaborator>,
        temperatures: &crate::config::Temperatures,
    ) -> Self {
        Self::new(
            Arc::new(Scanner::new(collaborator.clone(), temperatures.scanner)),
            Arc::new(Fixer::new(collaborator.clone(), temperatures.fixer)),
            Arc::new(Validator::new(collaborator, temperatures.validator)),
        )
    }

    pub fn get(&self, stage: Stage) -> &Arc<dyn StageAdapter> {
        match stage {
            Stage::Scanner => &self.scanner,
            Stage::Fixer => &self.fixer,
            Stage::Validator => &self.validator,
        }
    }
}
