//! Scripted stage and collaborator doubles for tests.
//!
//! Compiled for unit tests and behind the `test-support` feature, which the
//! integration tests under `tests/` enable to drive the orchestrator without
//! a language-model endpoint.

use async_trait::async_trait;
use mender_common::{Edit, Finding, Stage, ValidationResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::{CollaboratorError, StageError};
use crate::pipeline::orchestrator::ExecutionPolicy;
use crate::stages::{
    Collaborator, FixReport, ScanReport, StageAdapter, StageInput, StagePayload, StageSet,
};

enum Step {
    Respond(Result<StagePayload, StageError>),
    Hang,
}

/// A stage adapter that replays a fixed script of responses.
pub struct ScriptedStage {
    stage: Stage,
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<StagePayload>,
    delay: Option<Duration>,
    log: CallLog,
}

impl ScriptedStage {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            steps: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: None,
            log: CallLog::default(),
        }
    }

    fn push(self, step: Step) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
        self
    }

    pub fn respond(self, payload: StagePayload) -> Self {
        self.push(Step::Respond(Ok(payload)))
    }

    pub fn scan(self, report: ScanReport) -> Self {
        self.respond(StagePayload::Scan(report))
    }

    pub fn fix(self, fixed_code: &str) -> Self {
        self.respond(StagePayload::Fix(FixReport::new(
            fixed_code,
            vec![Edit::new("FIX-001", 1, "", fixed_code, "scripted fix")],
        )))
    }

    pub fn validate(self, result: ValidationResult) -> Self {
        self.respond(StagePayload::Validate(result))
    }

    pub fn fail(self, err: StageError) -> Self {
        self.push(Step::Respond(Err(err)))
    }

    /// Never answer. Only a timeout or cancellation ends the call.
    pub fn hang(self) -> Self {
        self.push(Step::Hang)
    }

    /// Response used once the script runs out.
    pub fn then_always(mut self, payload: StagePayload) -> Self {
        self.fallback = Some(payload);
        self
    }

    /// Sleep before every response.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn next_step(&self) -> Option<Step> {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

/// Counts `abandoned` when the call future is dropped before finishing.
struct InFlight {
    log: CallLog,
    armed: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            self.log.inner().abandoned += 1;
        }
    }
}

#[async_trait]
impl StageAdapter for ScriptedStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn invoke(&self, input: &StageInput) -> Result<StagePayload, StageError> {
        self.log.record(self.stage, input.clone());
        let mut in_flight = InFlight {
            log: self.log.clone(),
            armed: true,
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = match self.next_step() {
            Some(Step::Respond(result)) => result,
            Some(Step::Hang) => std::future::pending().await,
            None => self.fallback.clone().ok_or_else(|| {
                StageError::invalid_input(self.stage, "scripted stage ran out of responses")
            }),
        };
        in_flight.armed = false;
        result
    }
}

#[derive(Default)]
struct CallLogInner {
    calls: Vec<Stage>,
    inputs: Vec<StageInput>,
    abandoned: usize,
}

/// Shared record of every scripted invocation, in order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<CallLogInner>>);

impl CallLog {
    fn inner(&self) -> std::sync::MutexGuard<'_, CallLogInner> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, stage: Stage, input: StageInput) {
        let mut inner = self.inner();
        inner.calls.push(stage);
        inner.inputs.push(input);
    }

    pub fn sequence(&self) -> Vec<Stage> {
        self.inner().calls.clone()
    }

    pub fn inputs(&self) -> Vec<StageInput> {
        self.inner().inputs.clone()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.inner().calls.iter().filter(|s| **s == stage).count()
    }

    pub fn scanner(&self) -> usize {
        self.count(Stage::Scanner)
    }

    pub fn fixer(&self) -> usize {
        self.count(Stage::Fixer)
    }

    pub fn validator(&self) -> usize {
        self.count(Stage::Validator)
    }

    pub fn total(&self) -> usize {
        self.inner().calls.len()
    }

    /// Calls dropped while still in flight.
    pub fn abandoned(&self) -> usize {
        self.inner().abandoned
    }
}

/// Builds a `StageSet` of scripted stages sharing one `CallLog`.
pub struct Script {
    scanner: ScriptedStage,
    fixer: ScriptedStage,
    validator: ScriptedStage,
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

impl Script {
    pub fn new() -> Self {
        Self {
            scanner: ScriptedStage::new(Stage::Scanner),
            fixer: ScriptedStage::new(Stage::Fixer),
            validator: ScriptedStage::new(Stage::Validator),
        }
    }

    pub fn scanner(mut self, stage: ScriptedStage) -> Self {
        self.scanner = stage;
        self
    }

    pub fn fixer(mut self, stage: ScriptedStage) -> Self {
        self.fixer = stage;
        self
    }

    pub fn validator(mut self, stage: ScriptedStage) -> Self {
        self.validator = stage;
        self
    }

    pub fn build(self) -> (StageSet, CallLog) {
        let log = CallLog::default();
        let mut scanner = self.scanner;
        let mut fixer = self.fixer;
        let mut validator = self.validator;
        scanner.log = log.clone();
        fixer.log = log.clone();
        validator.log = log.clone();
        (
            StageSet::new(Arc::new(scanner), Arc::new(fixer), Arc::new(validator)),
            log,
        )
    }
}

/// A scan report with `n` distinct errors.
pub fn scan_errors(n: usize) -> ScanReport {
    ScanReport::with_errors(
        (1..=n)
            .map(|i| {
                Finding::error(&format!("ERR-{:03}", i), "SyntaxError", "invalid syntax")
                    .with_line(i as u32)
            })
            .collect(),
    )
}

/// Short timeouts and no backoff so failure paths run fast.
pub fn fast_policy() -> ExecutionPolicy {
    ExecutionPolicy {
        stage_timeout: Duration::from_millis(200),
        stage_retries: 1,
        retry_backoff: Duration::from_millis(1),
    }
}

/// A collaborator that replays canned completions and records prompts.
#[derive(Default)]
pub struct ScriptedCollaborator {
    responses: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    prompts: Mutex<Vec<(String, f32)>>,
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(body.to_string()));
        self
    }

    pub fn error(self, err: CollaboratorError) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(err));
        self
    }

    pub fn prompts(&self) -> Vec<(String, f32)> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, CollaboratorError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((prompt.to_string(), temperature));
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Err(CollaboratorError::EmptyResponse))
    }
}
