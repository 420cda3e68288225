//! Admin endpoints: submit, cancel and inspect workflows.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use drover_types::{LogEntry, SubmitRequest, SubmitResponse, WorkflowInfo};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// POST /api/v1/queue
pub async fn submit_workflow_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    if request.config.stages.is_empty() {
        return Err(ServerError::BadRequest(
            "workflow has no stages".to_string(),
        ));
    }
    let id = state.hub.submit(request)?;
    Ok((StatusCode::CREATED, Json(SubmitResponse { id })))
}

/// POST /api/v1/workflows/{id}/cancel
pub async fn cancel_workflow_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.hub.cancel(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowInfo>> {
    Ok(Json(state.hub.info(&id)?))
}

/// GET /api/v1/workflows/{id}/logs
pub async fn workflow_logs_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LogEntry>>> {
    Ok(Json(state.hub.logs(&id)?))
}
