//! The control loop that drives one run through the stage graph.
//!
//! Each iteration of the loop executes at most one stage: publish
//! `agent_start`, invoke the adapter (bounded by the policy's timeout and
//! retries, abandoned on cancellation), merge the result with the reducer,
//! publish `agent_complete`, route, and checkpoint. Stage failures end the
//! run with a recorded cause; broken invariants abort it.

use chrono::Utc;
use mender_common::{RunId, Stage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::errors::{InvariantViolation, StageError, WorkflowError};
use crate::pipeline::checkpoint::{CheckpointStore, RetentionPolicy};
use crate::pipeline::events::{EventEmitter, PipelineEvent};
use crate::pipeline::reducer::{StageFailure, StageUpdate, conclude, reduce};
use crate::pipeline::request::{DebugRequest, RequestLimits};
use crate::pipeline::router::{Target, Transition, route};
use crate::pipeline::state::{FailureCause, FailureKind, Outcome, Phase, RunProjection, RunState};
use crate::stages::{StageInput, StageOutput, StageSet, invoke_timed};

/// Timeout and retry bounds for stage calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Upper bound for a single adapter attempt.
    pub stage_timeout: Duration,
    /// Extra attempts after the first for retryable failures.
    pub stage_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(60),
            stage_retries: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

type Registry = Arc<Mutex<HashMap<RunId, CancellationToken>>>;

/// Exclusive right to drive a run. Released on drop.
struct RunClaim {
    registry: Registry,
    run_id: RunId,
    token: CancellationToken,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        let mut active = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.run_id);
    }
}

/// A run executing on a background task.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    join: JoinHandle<Result<RunProjection, WorkflowError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the run when the returned guard is dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    pub async fn wait(self) -> Result<RunProjection, WorkflowError> {
        let run_id = self.run_id;
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(WorkflowError::TaskFailed {
                run_id,
                message: e.to_string(),
            }),
        }
    }
}

enum Step {
    Continue(RunState),
    Finished(RunState),
}

enum Attempt {
    Output(StageOutput),
    Failed(StageFailure),
    Cancelled,
}

pub struct Orchestrator {
    stages: StageSet,
    checkpoints: Arc<CheckpointStore>,
    events: Arc<EventEmitter>,
    policy: ExecutionPolicy,
    limits: RequestLimits,
    active: Registry,
}

impl Orchestrator {
    pub fn new(
        stages: StageSet,
        checkpoints: Arc<CheckpointStore>,
        events: Arc<EventEmitter>,
        policy: ExecutionPolicy,
        limits: RequestLimits,
    ) -> Self {
        Self {
            stages,
            checkpoints,
            events,
            policy,
            limits,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn is_active(&self, run_id: RunId) -> bool {
        self.lock_active().contains_key(&run_id)
    }

    /// Validate a request and create its run: first checkpoint, open event channel.
    pub async fn prepare(&self, request: &DebugRequest) -> Result<RunState, WorkflowError> {
        let validated = self.limits.validate(request)?;
        let state = RunState::new(
            RunId::new(),
            validated.code,
            validated.language,
            validated.context,
            validated.max_iterations,
            Utc::now(),
        );
        self.checkpoints.put(&state).await;
        self.events.open(state.run_id).await;
        info!(
            run_id = %state.run_id,
            language = %state.language,
            max_iterations = state.max_iterations,
            "run prepared"
        );
        Ok(state)
    }

    /// Drive `state` to completion on the current task.
    pub async fn run(&self, state: RunState) -> Result<RunProjection, WorkflowError> {
        let claim = self.claim(state.run_id)?;
        self.drive(state, claim).await
    }

    /// Drive `state` on a background task.
    pub fn spawn(self: &Arc<Self>, state: RunState) -> Result<RunHandle, WorkflowError> {
        let run_id = state.run_id;
        let claim = self.claim(run_id)?;
        let cancel = claim.token.clone();
        let this = Arc::clone(self);
        let join = tokio::spawn(async move { this.drive(state, claim).await });
        Ok(RunHandle {
            run_id,
            cancel,
            join,
        })
    }

    /// Continue a run from its last checkpoint.
    pub async fn resume(self: &Arc<Self>, run_id: RunId) -> Result<RunHandle, WorkflowError> {
        let state = self
            .checkpoints
            .get(run_id)
            .await
            .ok_or(WorkflowError::RunNotFound { run_id })?;
        if state.is_terminal() {
            return Err(WorkflowError::RunAlreadyFinished { run_id });
        }
        if self.is_active(run_id) {
            return Err(WorkflowError::RunAlreadyActive { run_id });
        }
        self.events.open(run_id).await;
        info!(%run_id, phase = %state.phase, iteration = state.iteration, "resuming run");
        self.spawn(state)
    }

    /// Cancel a run. An idle, unfinished run is concluded immediately.
    pub async fn cancel(&self, run_id: RunId) -> Result<(), WorkflowError> {
        let token = self.lock_active().get(&run_id).cloned();
        if let Some(token) = token {
            info!(%run_id, "cancellation requested");
            token.cancel();
            return Ok(());
        }

        let state = self
            .checkpoints
            .get(run_id)
            .await
            .ok_or(WorkflowError::RunNotFound { run_id })?;
        if state.is_terminal() {
            return Err(WorkflowError::RunAlreadyFinished { run_id });
        }
        let claim = self.claim(run_id)?;
        claim.token.cancel();
        self.drive(state, claim).await.map(|_| ())
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(&self, run_id: RunId) -> Result<RunClaim, WorkflowError> {
        let mut active = self.lock_active();
        if active.contains_key(&run_id) {
            return Err(WorkflowError::RunAlreadyActive { run_id });
        }
        let token = CancellationToken::new();
        active.insert(run_id, token.clone());
        Ok(RunClaim {
            registry: Arc::clone(&self.active),
            run_id,
            token,
        })
    }

    async fn drive(&self, state: RunState, claim: RunClaim) -> Result<RunProjection, WorkflowError> {
        let span = info_span!("run", run_id = %state.run_id);
        async move {
            let mut state = state;
            loop {
                match self.step(&state, &claim.token).await {
                    Ok(Step::Continue(next)) => state = next,
                    Ok(Step::Finished(done)) => return Ok(done.projection()),
                    Err(violation) => return Err(self.abort(state, violation).await),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn step(
        &self,
        state: &RunState,
        cancel: &CancellationToken,
    ) -> Result<Step, InvariantViolation> {
        if state.is_terminal() {
            return Ok(Step::Finished(state.clone()));
        }
        if cancel.is_cancelled() {
            return self.finish(state, Outcome::Cancelled).await.map(Step::Finished);
        }

        let Some(stage) = state.phase.stage() else {
            let transition = route(state)?;
            return self.advance(state, transition).await;
        };

        let run_id = state.run_id;
        self.events
            .publish(
                run_id,
                PipelineEvent::AgentStart {
                    agent: stage,
                    message: start_message(stage).to_string(),
                    iteration: state.iteration,
                },
            )
            .await;

        match self.attempt(state, stage, cancel).await {
            Attempt::Output(output) => {
                let merged = reduce(state, stage, &StageUpdate::Output(output.clone()))?;
                if merged.history.len() != state.history.len() + 1 {
                    return Err(InvariantViolation(format!(
                        "{} merge changed history by {} entries",
                        stage,
                        merged.history.len() as i64 - state.history.len() as i64
                    )));
                }
                merged.check_invariants()?;
                self.events
                    .publish(
                        run_id,
                        PipelineEvent::AgentComplete {
                            agent: stage,
                            message: output.payload.summary(),
                            iteration: merged.iteration,
                            result: output.to_event_result(),
                        },
                    )
                    .await;
                let transition = route(&merged)?;
                self.advance(&merged, transition).await
            }
            Attempt::Failed(failure) => {
                let merged = reduce(state, stage, &StageUpdate::Failure(failure.clone()))?;
                let cause = FailureCause {
                    stage: Some(stage),
                    kind: failure.kind,
                    message: failure.message,
                };
                self.finish(&merged, Outcome::Failed(cause))
                    .await
                    .map(Step::Finished)
            }
            Attempt::Cancelled => self.finish(state, Outcome::Cancelled).await.map(Step::Finished),
        }
    }

    /// Run one stage under the execution policy. Cancellation drops the
    /// in-flight call, which aborts the underlying request.
    async fn attempt(&self, state: &RunState, stage: Stage, cancel: &CancellationToken) -> Attempt {
        let adapter = Arc::clone(self.stages.get(stage));
        let input = StageInput::project(state, stage);
        let attempts = self.policy.stage_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            let call = async {
                match tokio::time::timeout(
                    self.policy.stage_timeout,
                    invoke_timed(adapter.as_ref(), &input),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StageError::timed_out(stage, self.policy.stage_timeout)),
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Attempt::Cancelled,
                result = call => result,
            };

            match result {
                Ok(output) => {
                    debug!(
                        %stage,
                        attempt,
                        elapsed_ms = output.execution_time.as_millis() as u64,
                        "stage completed"
                    );
                    return Attempt::Output(output);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(%stage, attempt, error = %err, "stage attempt failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Attempt::Cancelled,
                        _ = tokio::time::sleep(self.policy.retry_backoff) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(%stage, attempt, error = %err, "stage failed");
                    return Attempt::Failed(StageFailure {
                        kind: failure_kind(&err),
                        message: err.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }
    }

    async fn advance(
        &self,
        state: &RunState,
        transition: Transition,
    ) -> Result<Step, InvariantViolation> {
        let mut next = state.clone();
        if transition.completes_cycle {
            next.iteration += 1;
        }
        match transition.target {
            Target::Stage(stage) => {
                next.phase = Phase::for_stage(stage);
                next.check_invariants()?;
                self.checkpoints.put(&next).await;
                debug!(next = %stage, iteration = next.iteration, "advanced");
                Ok(Step::Continue(next))
            }
            Target::Done(completion) => {
                next.check_invariants()?;
                self.finish(&next, completion.outcome())
                    .await
                    .map(Step::Finished)
            }
        }
    }

    async fn finish(&self, state: &RunState, outcome: Outcome) -> Result<RunState, InvariantViolation> {
        let done = conclude(state, outcome, Utc::now())?;
        done.check_invariants()?;
        self.checkpoints.conclude(&done).await;

        let projection = done.projection();
        let event = match &done.outcome {
            Some(Outcome::Failed(cause)) => PipelineEvent::Error {
                agent: cause.stage,
                message: projection.message.clone(),
                result: Some(Box::new(projection.clone())),
            },
            Some(Outcome::Cancelled) => PipelineEvent::Error {
                agent: None,
                message: projection.message.clone(),
                result: Some(Box::new(projection.clone())),
            },
            _ => PipelineEvent::WorkflowComplete {
                message: projection.message.clone(),
                result: Box::new(projection.clone()),
            },
        };
        self.publish_terminal(done.run_id, event).await;

        info!(
            status = %projection.workflow_status,
            iteration = done.iteration,
            stages = done.stage_invocations(),
            elapsed_ms = projection.elapsed_ms.unwrap_or_default(),
            "run finished"
        );
        Ok(done)
    }

    /// Conclude a run whose invariants broke. `state` is the last good state.
    async fn abort(&self, state: RunState, violation: InvariantViolation) -> WorkflowError {
        let run_id = state.run_id;
        error!(%run_id, error = %violation, "aborting run");
        let cause = FailureCause {
            stage: state.phase.stage(),
            kind: FailureKind::InternalInvariantViolation,
            message: violation.0.clone(),
        };
        let agent = cause.stage;
        let event = match conclude(&state, Outcome::Failed(cause), Utc::now()) {
            Ok(done) => {
                self.checkpoints.conclude(&done).await;
                let projection = done.projection();
                PipelineEvent::Error {
                    agent,
                    message: projection.message.clone(),
                    result: Some(Box::new(projection)),
                }
            }
            Err(_) => PipelineEvent::Error {
                agent,
                message: violation.to_string(),
                result: None,
            },
        };
        self.publish_terminal(run_id, event).await;
        WorkflowError::Invariant {
            run_id,
            source: violation,
        }
    }

    async fn publish_terminal(&self, run_id: RunId, event: PipelineEvent) {
        self.events.publish(run_id, event).await;
        if self.checkpoints.retention() == RetentionPolicy::RemoveOnTerminal {
            self.events.forget(run_id).await;
        }
    }
}

fn start_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Scanner => "Scanning code for errors...",
        Stage::Fixer => "Fixing detected errors...",
        Stage::Validator => "Validating fixes...",
    }
}

fn failure_kind(err: &StageError) -> FailureKind {
    match err {
        StageError::InvalidInput { .. } => FailureKind::InvalidInput,
        StageError::CollaboratorUnavailable { .. } | StageError::MalformedResponse { .. } => {
            FailureKind::CollaboratorUnavailable
        }
    }
}
