//! End-to-end pipeline behaviour against scripted stages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mender::errors::{StageError, WorkflowError};
use mender::pipeline::reducer::{StageUpdate, reduce};
use mender::pipeline::state::HistoryKind;
use mender::pipeline::{
    CheckpointStore, DebugRequest, EventEmitter, ExecutionPolicy, FailureKind, Orchestrator,
    Outcome, Phase, PipelineEvent, RequestLimits, RunState,
};
use mender::stages::{ScanReport, StageOutput, StagePayload};
use mender::test_support::{CallLog, Script, ScriptedStage, fast_policy, scan_errors};
use mender_common::{Language, RunId, Stage, ValidationResult};
use proptest::prelude::*;

fn orchestrator_with(script: Script, policy: ExecutionPolicy) -> (Arc<Orchestrator>, CallLog) {
    let (stages, log) = script.build();
    let orchestrator = Orchestrator::new(
        stages,
        Arc::new(CheckpointStore::default()),
        Arc::new(EventEmitter::default()),
        policy,
        RequestLimits::default(),
    );
    (Arc::new(orchestrator), log)
}

fn orchestrator(script: Script) -> (Arc<Orchestrator>, CallLog) {
    orchestrator_with(script, fast_policy())
}

async fn run_to_end(
    orchestrator: &Arc<Orchestrator>,
    request: DebugRequest,
) -> (RunState, Vec<PipelineEvent>) {
    let state = orchestrator.prepare(&request).await.unwrap();
    let run_id = state.run_id;
    let subscription = orchestrator.events().subscribe(run_id).await.unwrap();
    let collector = tokio::spawn(async move {
        use futures::StreamExt;
        subscription.into_stream().collect::<Vec<_>>().await
    });
    orchestrator.run(state).await.unwrap();
    let events = collector.await.unwrap();
    let final_state = orchestrator.checkpoints().get(run_id).await.unwrap();
    (final_state, events)
}

fn kinds(events: &[PipelineEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| match e {
            PipelineEvent::AgentStart { agent, .. } => format!("start:{}", agent),
            PipelineEvent::AgentComplete { agent, .. } => format!("complete:{}", agent),
            other => other.kind().to_string(),
        })
        .collect()
}

fn stage_entries(state: &RunState) -> usize {
    state
        .history
        .iter()
        .filter(|h| h.kind != HistoryKind::Finished)
        .count()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_a_clean_code_stops_after_scanner() {
    let (orch, log) =
        orchestrator(Script::new().scanner(ScriptedStage::new(Stage::Scanner).scan(ScanReport::clean())));

    let (state, events) = run_to_end(&orch, DebugRequest::new("print('ok')")).await;

    assert_eq!(log.sequence(), vec![Stage::Scanner]);
    assert_eq!(state.outcome, Some(Outcome::Clean));
    assert_eq!(state.iteration, 0);
    assert!(state.validation.is_none());
    assert_eq!(state.current_code, "print('ok')");
    assert_eq!(
        kinds(&events),
        vec!["start:Scanner", "complete:Scanner", "workflow_complete"]
    );
}

#[tokio::test]
async fn scenario_b_single_pass_approval() {
    let (orch, log) = orchestrator(
        Script::new()
            .scanner(ScriptedStage::new(Stage::Scanner).scan(scan_errors(1)))
            .fixer(ScriptedStage::new(Stage::Fixer).fix("def add(a, b): return a + b"))
            .validator(ScriptedStage::new(Stage::Validator).validate(ValidationResult::approved(0.95))),
    );

    let (state, events) = run_to_end(&orch, DebugRequest::new("def add(a): return a + b")).await;

    assert_eq!(log.sequence(), vec![Stage::Scanner, Stage::Fixer, Stage::Validator]);
    assert_eq!(state.outcome, Some(Outcome::Approved));
    assert_eq!(state.iteration, 0);
    assert_eq!(state.current_code, "def add(a, b): return a + b");
    assert_eq!(state.code, "def add(a): return a + b");
    assert_eq!(
        kinds(&events),
        vec![
            "start:Scanner",
            "complete:Scanner",
            "start:Fixer",
            "complete:Fixer",
            "start:Validator",
            "complete:Validator",
            "workflow_complete",
        ]
    );

    let PipelineEvent::WorkflowComplete { result, .. } = events.last().unwrap() else {
        panic!("Expected workflow_complete last");
    };
    assert_eq!(**result, state.projection());
    assert!(result.success);
    assert_eq!(result.summary.errors_found, 1);
    assert_eq!(result.summary.errors_fixed, 1);
}

#[tokio::test]
async fn scenario_c_iteration_limit_after_second_validation() {
    let (orch, log) = orchestrator(
        Script::new()
            .scanner(
                ScriptedStage::new(Stage::Scanner)
                    .scan(scan_errors(2))
                    .scan(scan_errors(1)),
            )
            .fixer(ScriptedStage::new(Stage::Fixer).fix("attempt one").fix("attempt two"))
            .validator(
                ScriptedStage::new(Stage::Validator)
                    .validate(ValidationResult::needs_revision(0.4))
                    .validate(ValidationResult::needs_revision(0.6)),
            ),
    );

    let request = DebugRequest::new("broken code").with_max_iterations(2);
    let (state, events) = run_to_end(&orch, request).await;

    assert_eq!(state.outcome, Some(Outcome::IterationLimitReached));
    assert_eq!(state.iteration, 2);
    assert_eq!(log.scanner(), 2);
    assert_eq!(log.fixer(), 2);
    assert_eq!(log.validator(), 2);
    assert_eq!(log.sequence().last(), Some(&Stage::Validator));

    let projection = state.projection();
    assert_eq!(projection.workflow_status, "completed_with_warnings");
    assert_eq!(projection.final_code, "attempt two");
    assert_eq!(events.last().unwrap().kind(), "workflow_complete");
}

#[tokio::test]
async fn scenario_d_fixer_timeout_fails_without_validation() {
    let (orch, log) = orchestrator(
        Script::new()
            .scanner(ScriptedStage::new(Stage::Scanner).scan(scan_errors(1)))
            .fixer(ScriptedStage::new(Stage::Fixer).hang().hang()),
    );

    let (state, events) = run_to_end(&orch, DebugRequest::new("x = (")).await;

    let Some(Outcome::Failed(cause)) = &state.outcome else {
        panic!("Expected failed outcome, got {:?}", state.outcome);
    };
    assert_eq!(cause.stage, Some(Stage::Fixer));
    assert_eq!(cause.kind, FailureKind::CollaboratorUnavailable);
    assert!(cause.message.contains("timed out"));
    assert_eq!(log.validator(), 0);
    // First attempt plus one retry, both abandoned at the timeout.
    assert_eq!(log.fixer(), 2);
    assert_eq!(log.abandoned(), 2);

    let last = events.last().unwrap();
    let PipelineEvent::Error { agent, result, .. } = last else {
        panic!("Expected error event last, got {:?}", last);
    };
    assert_eq!(*agent, Some(Stage::Fixer));
    assert_eq!(result.as_ref().unwrap().workflow_status, "failed");
}

// =============================================================================
// Re-scan, retries, cancellation, resume
// =============================================================================

#[tokio::test]
async fn rescan_analyses_latest_fixed_code() {
    let (orch, log) = orchestrator(
        Script::new()
            .scanner(
                ScriptedStage::new(Stage::Scanner)
                    .scan(scan_errors(1))
                    .scan(ScanReport::clean()),
            )
            .fixer(ScriptedStage::new(Stage::Fixer).fix("second draft"))
            .validator(ScriptedStage::new(Stage::Validator).validate(ValidationResult::rejected(0.2))),
    );

    let (state, _) = run_to_end(&orch, DebugRequest::new("first draft")).await;

    assert_eq!(state.outcome, Some(Outcome::Clean));
    assert_eq!(state.iteration, 1);
    let scans: Vec<String> = log
        .inputs()
        .into_iter()
        .filter_map(|input| match input {
            mender::stages::StageInput::Scan { code, .. } => Some(code),
            _ => None,
        })
        .collect();
    assert_eq!(scans, vec!["first draft".to_string(), "second draft".to_string()]);
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let (orch, log) = orchestrator(
        Script::new().scanner(
            ScriptedStage::new(Stage::Scanner)
                .fail(StageError::unavailable(Stage::Scanner, "503 from upstream"))
                .scan(ScanReport::clean()),
        ),
    );

    let (state, _) = run_to_end(&orch, DebugRequest::new("ok()")).await;

    assert_eq!(state.outcome, Some(Outcome::Clean));
    assert_eq!(log.scanner(), 2);
    // Retries are not separate merges.
    assert_eq!(stage_entries(&state), 1);
}

#[tokio::test]
async fn cancellation_reaches_in_flight_call() {
    let policy = ExecutionPolicy {
        stage_timeout: Duration::from_secs(30),
        stage_retries: 0,
        retry_backoff: Duration::from_millis(1),
    };
    let (orch, log) = orchestrator_with(
        Script::new()
            .scanner(ScriptedStage::new(Stage::Scanner).scan(scan_errors(1)))
            .fixer(ScriptedStage::new(Stage::Fixer).hang()),
        policy,
    );

    let state = orch.prepare(&DebugRequest::new("loop(")).await.unwrap();
    let run_id = state.run_id;
    let mut subscription = orch.events().subscribe(run_id).await.unwrap();
    let handle = orch.spawn(state).unwrap();

    loop {
        match subscription.next().await {
            Some(PipelineEvent::AgentStart {
                agent: Stage::Fixer,
                ..
            }) => break,
            Some(_) => continue,
            None => panic!("Stream ended before the fixer started"),
        }
    }
    // Give the fixer call a moment to be in flight.
    tokio::time::sleep(Duration::from_millis(20)).await;
    orch.cancel(run_id).await.unwrap();

    let projection = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancelled run should finish promptly")
        .unwrap();
    assert_eq!(projection.workflow_status, "cancelled");
    assert_eq!(log.abandoned(), 1);
    assert_eq!(log.validator(), 0);

    let terminal = subscription.next().await.unwrap();
    assert_eq!(terminal.kind(), "error");
    assert!(subscription.next().await.is_none());
    assert!(!orch.is_active(run_id));
}

#[tokio::test]
async fn dropping_the_guard_cancels_the_run() {
    let policy = ExecutionPolicy {
        stage_timeout: Duration::from_secs(30),
        stage_retries: 0,
        retry_backoff: Duration::from_millis(1),
    };
    let (orch, log) =
        orchestrator_with(Script::new().scanner(ScriptedStage::new(Stage::Scanner).hang()), policy);

    let state = orch.prepare(&DebugRequest::new("x")).await.unwrap();
    let run_id = state.run_id;
    let handle = orch.spawn(state).unwrap();
    let guard = handle.drop_guard();
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(guard);

    let projection = handle.wait().await.unwrap();
    assert_eq!(projection.workflow_status, "cancelled");
    assert_eq!(log.abandoned(), 1);
    let snapshot = orch.checkpoints().get(run_id).await.unwrap();
    assert_eq!(snapshot.outcome, Some(Outcome::Cancelled));
}

#[tokio::test]
async fn resume_continues_from_checkpointed_phase() {
    let (orch, log) = orchestrator(
        Script::new()
            .fixer(ScriptedStage::new(Stage::Fixer).fix("repaired"))
            .validator(ScriptedStage::new(Stage::Validator).validate(ValidationResult::approved(0.9))),
    );

    // A run whose driver went away after the scanner result was checkpointed.
    let mut state = orch.prepare(&DebugRequest::new("brokn")).await.unwrap();
    state.errors = scan_errors(1).errors;
    state.phase = Phase::Fixing;
    orch.checkpoints().put(&state).await;

    let handle = orch.resume(state.run_id).await.unwrap();
    let projection = handle.wait().await.unwrap();

    assert_eq!(log.sequence(), vec![Stage::Fixer, Stage::Validator]);
    assert_eq!(projection.workflow_status, "completed");
    assert_eq!(projection.final_code, "repaired");

    let err = orch.resume(state.run_id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::RunAlreadyFinished { .. }));
}

#[tokio::test]
async fn late_observer_receives_only_final_snapshot() {
    let (orch, _) =
        orchestrator(Script::new().scanner(ScriptedStage::new(Stage::Scanner).scan(ScanReport::clean())));

    let state = orch.prepare(&DebugRequest::new("ok")).await.unwrap();
    let run_id = state.run_id;
    orch.run(state).await.unwrap();

    let mut late = orch.events().subscribe(run_id).await.unwrap();
    let only = late.next().await.unwrap();
    assert_eq!(only.kind(), "workflow_complete");
    assert!(late.next().await.is_none());
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let (orch, log) = orchestrator(
        Script::new().scanner(
            ScriptedStage::new(Stage::Scanner)
                .delayed(Duration::from_millis(10))
                .then_always(StagePayload::Scan(ScanReport::clean())),
        ),
    );

    let mut handles = Vec::new();
    for i in 0..5 {
        let state = orch
            .prepare(&DebugRequest::new(format!("print({})", i)))
            .await
            .unwrap();
        handles.push(orch.spawn(state).unwrap());
    }

    let mut seen = std::collections::HashSet::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let projection = handle.wait().await.unwrap();
        assert_eq!(projection.final_code, format!("print({})", i));
        assert_eq!(projection.workflow_status, "completed");
        seen.insert(projection.run_id);
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(log.scanner(), 5);
    assert_eq!(orch.checkpoints().len().await, 5);
}

#[tokio::test]
async fn invalid_request_runs_no_stage() {
    let (orch, log) = orchestrator(Script::new());
    let err = orch
        .prepare(&DebugRequest::new("fn main() {}").with_language("rust"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)));
    assert_eq!(log.total(), 0);
    assert!(orch.checkpoints().is_empty().await);
}

#[tokio::test]
async fn empty_fix_aborts_the_run() {
    let (orch, log) = orchestrator(
        Script::new()
            .scanner(ScriptedStage::new(Stage::Scanner).scan(scan_errors(1)))
            .fixer(ScriptedStage::new(Stage::Fixer).fix("")),
    );

    let state = orch.prepare(&DebugRequest::new("x = (")).await.unwrap();
    let run_id = state.run_id;
    let subscription = orch.events().subscribe(run_id).await.unwrap();
    let collector = tokio::spawn(async move {
        use futures::StreamExt;
        subscription.into_stream().collect::<Vec<_>>().await
    });

    let err = orch.run(state).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Invariant { run_id: id, .. } if id == run_id));

    let events = collector.await.unwrap();
    assert_eq!(events.last().unwrap().kind(), "error");

    let checkpoint = orch.checkpoints().get(run_id).await.unwrap();
    let Some(Outcome::Failed(cause)) = &checkpoint.outcome else {
        panic!("Expected failed outcome, got {:?}", checkpoint.outcome);
    };
    assert_eq!(cause.kind, FailureKind::InternalInvariantViolation);
    assert!(!orch.is_active(run_id));
    assert_eq!(log.validator(), 0);
}

// =============================================================================
// Properties
// =============================================================================

fn verdict(approve: bool) -> ValidationResult {
    if approve {
        ValidationResult::approved(0.9)
    } else {
        ValidationResult::needs_revision(0.5)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_runs_terminate_within_bounds(
        max_iterations in 0u32..=5,
        verdicts in proptest::collection::vec(any::<bool>(), 0..8),
        clean_rescans in proptest::collection::vec(any::<bool>(), 0..8),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let mut scanner = ScriptedStage::new(Stage::Scanner).scan(scan_errors(1));
        for clean in &clean_rescans {
            scanner = scanner.scan(if *clean { ScanReport::clean() } else { scan_errors(1) });
        }
        let scanner = scanner.then_always(StagePayload::Scan(scan_errors(1)));

        let mut validator = ScriptedStage::new(Stage::Validator);
        for approve in &verdicts {
            validator = validator.validate(verdict(*approve));
        }
        let validator = validator.then_always(StagePayload::Validate(verdict(false)));

        let fixer = ScriptedStage::new(Stage::Fixer).then_always(StagePayload::Fix(
            mender::stages::FixReport::new("patched", vec![]),
        ));

        let (orch, log) = orchestrator(Script::new().scanner(scanner).fixer(fixer).validator(validator));
        let request = DebugRequest::new("seed").with_max_iterations(max_iterations);

        let state = runtime.block_on(async {
            let state = orch.prepare(&request).await.unwrap();
            let run_id = state.run_id;
            orch.run(state).await.unwrap();
            orch.checkpoints().get(run_id).await.unwrap()
        });

        prop_assert!(state.is_terminal());
        prop_assert!(state.iteration <= state.max_iterations);
        let cycles = max_iterations.max(1) as usize;
        prop_assert!(log.total() <= 3 * cycles);
        if max_iterations <= 3 {
            prop_assert!(log.total() <= 3 + 2 * max_iterations as usize);
        }
        prop_assert_eq!(stage_entries(&state), log.total());
        prop_assert_eq!(
            state.history.iter().filter(|h| h.kind == HistoryKind::Finished).count(),
            1
        );
        prop_assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn prop_reduce_is_deterministic(
        errors in 0usize..4,
        quality in 0.0f64..10.0,
        millis in 0u64..5_000,
    ) {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let state = RunState::new(RunId::new(), "code".into(), Language::Python, None, 3, at);
        let mut report = scan_errors(errors);
        report.quality_score = Some(quality);
        let update = StageUpdate::Output(StageOutput::new(
            StagePayload::Scan(report),
            Duration::from_millis(millis),
            at,
        ));

        let first = reduce(&state, Stage::Scanner, &update).unwrap();
        let second = reduce(&state, Stage::Scanner, &update).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.history.len(), state.history.len() + 1);
        prop_assert_eq!(first.errors.len(), errors);
    }
}
