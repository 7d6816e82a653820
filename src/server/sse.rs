//! Server-sent event endpoints for observing runs as they execute.
//!
//! Every stream opens with a `connected` event carrying the run id, then
//! forwards the run's `agent_start` / `agent_complete` events and closes
//! after the terminal `workflow_complete` or `error` event.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, stream};
use mender_common::RunId;
use tokio_util::sync::DropGuard;
use tracing::{debug, warn};

use super::api::{ApiError, SharedState, parse_run_id};
use crate::pipeline::{DebugRequest, PipelineEvent, Subscription};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Start a run and stream its events. Closing the connection cancels it.
pub async fn debug_stream(
    State(state): State<SharedState>,
    Json(request): Json<DebugRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let orchestrator = &state.orchestrator;
    let run = orchestrator.prepare(&request).await?;
    let run_id = run.run_id;
    // Subscribe before spawning so the first agent_start is not missed.
    let subscription = orchestrator
        .events()
        .subscribe(run_id)
        .await
        .ok_or_else(|| ApiError::Internal(format!("Event channel for run {} is closed", run_id)))?;
    let handle = orchestrator.spawn(run)?;
    let guard = handle.drop_guard();
    drop(handle);

    Ok(sse_response(run_id, subscription, Some(guard)))
}

/// Attach to an existing run. Disconnecting does not affect the run.
pub async fn run_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let run_id = parse_run_id(&id)?;
    let subscription = state
        .orchestrator
        .events()
        .subscribe(run_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No events for run {}", run_id)))?;
    Ok(sse_response(run_id, subscription, None))
}

fn sse_response(
    run_id: RunId,
    subscription: Subscription,
    guard: Option<DropGuard>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connected = Event::default()
        .event("connected")
        .data(serde_json::json!({"type": "connected", "run_id": run_id}).to_string());

    // The guard lives as long as the stream; axum drops the stream when
    // the client goes away, which cancels an owned run.
    let events = subscription.into_stream().map(move |event| {
        let _owned = &guard;
        Ok(to_sse_event(run_id, &event))
    });

    let stream = stream::once(async move { Ok(connected) }).chain(events);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}

fn to_sse_event(run_id: RunId, event: &PipelineEvent) -> Event {
    if event.is_terminal() {
        debug!(%run_id, kind = event.kind(), "closing event stream");
    }
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(event.kind()).data(json),
        Err(e) => {
            warn!(%run_id, error = %e, "failed to serialize pipeline event");
            Event::default().event("error").data(
                serde_json::json!({"type": "error", "message": format!("serialization failed: {}", e)})
                    .to_string(),
            )
        }
    }
}
