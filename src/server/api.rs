use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mender_common::RunId;
use serde::Serialize;
use tracing::{error, warn};

use super::sse;
use crate::errors::WorkflowError;
use crate::pipeline::{DebugRequest, Orchestrator, Phase, RunProjection};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub phase: Phase,
    pub active: bool,
    pub projection: RunProjection,
}

#[derive(Serialize)]
pub struct RunAction {
    pub run_id: RunId,
    pub status: &'static str,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err {
            WorkflowError::InvalidInput(_) => ApiError::BadRequest(message),
            WorkflowError::RunNotFound { .. } => ApiError::NotFound(message),
            WorkflowError::RunAlreadyActive { .. } | WorkflowError::RunAlreadyFinished { .. } => {
                ApiError::Conflict(message)
            }
            WorkflowError::Invariant { .. } | WorkflowError::TaskFailed { .. } => {
                error!(error = %message, "run aborted");
                ApiError::Internal(message)
            }
        }
    }
}

pub(super) fn parse_run_id(raw: &str) -> Result<RunId, ApiError> {
    raw.parse::<RunId>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid run id '{}'", raw)))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/debug", post(debug_sync))
        .route("/api/debug/stream", post(sse::debug_stream))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/events", get(sse::run_events))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/runs/{id}/resume", post(resume_run))
}

// ── Handlers ──────────────────────────────────────────────────────────

/// Run the whole pipeline and answer with the terminal projection.
/// Dropping the request cancels the run.
async fn debug_sync(
    State(state): State<SharedState>,
    Json(request): Json<DebugRequest>,
) -> Result<Json<RunProjection>, ApiError> {
    let orchestrator = &state.orchestrator;
    let run = orchestrator.prepare(&request).await?;
    let handle = orchestrator.spawn(run)?;
    let _cancel_on_disconnect = handle.drop_guard();
    let projection = handle.wait().await?;
    Ok(Json(projection))
}

async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RunStatus>, ApiError> {
    let run_id = parse_run_id(&id)?;
    let orchestrator = &state.orchestrator;
    let snapshot = orchestrator
        .checkpoints()
        .get(run_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", run_id)))?;
    Ok(Json(RunStatus {
        run_id,
        phase: snapshot.phase,
        active: orchestrator.is_active(run_id),
        projection: snapshot.projection(),
    }))
}

async fn cancel_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RunAction>, ApiError> {
    let run_id = parse_run_id(&id)?;
    state.orchestrator.cancel(run_id).await?;
    Ok(Json(RunAction {
        run_id,
        status: "cancelling",
    }))
}

async fn resume_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RunAction>), ApiError> {
    let run_id = parse_run_id(&id)?;
    let handle = state.orchestrator.resume(run_id).await?;
    tokio::spawn(async move {
        if let Err(e) = handle.wait().await {
            warn!(%run_id, error = %e, "resumed run ended with error");
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAction {
            run_id,
            status: "resumed",
        }),
    ))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "mender",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
