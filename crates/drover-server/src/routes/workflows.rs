//! Agent-facing workflow protocol endpoints.
//!
//! `next` and `wait` are long polls: they block up to the configured window
//! and answer `204 No Content` when it elapses.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use drover_types::{Filter, LogEntry, StepState, WaitResponse, WorkflowState};
use serde::{Deserialize, Serialize};

use crate::auth::AgentId;
use crate::error::Result;
use crate::state::AppState;

/// Response for a log batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsAccepted {
    pub accepted: usize,
}

/// POST /api/v1/next
pub async fn next_handler(
    State(state): State<AppState>,
    AgentId(agent): AgentId,
    Json(filter): Json<Filter>,
) -> Result<Response> {
    let window = state.config.long_poll;
    match state.hub.next(agent, &filter, window).await? {
        Some(workflow) => Ok(Json(workflow).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /api/v1/workflows/{id}/init
pub async fn init_handler(
    State(state): State<AppState>,
    AgentId(agent): AgentId,
    Path(id): Path<String>,
    Json(update): Json<WorkflowState>,
) -> Result<StatusCode> {
    state.hub.init(&id, agent, update)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/workflows/{id}/wait
pub async fn wait_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let window = state.config.long_poll;
    match state.hub.wait(&id, window).await? {
        Some(canceled) => Ok(Json(WaitResponse { canceled }).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /api/v1/workflows/{id}/done
pub async fn done_handler(
    State(state): State<AppState>,
    AgentId(agent): AgentId,
    Path(id): Path<String>,
    Json(update): Json<WorkflowState>,
) -> Result<StatusCode> {
    state.hub.done(&id, agent, update)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/workflows/{id}/extend
pub async fn extend_handler(
    State(state): State<AppState>,
    AgentId(agent): AgentId,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.hub.extend(&id, agent)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/workflows/{id}/steps
pub async fn update_step_handler(
    State(state): State<AppState>,
    AgentId(agent): AgentId,
    Path(id): Path<String>,
    Json(step): Json<StepState>,
) -> Result<StatusCode> {
    state.hub.update(&id, agent, step)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/logs
pub async fn logs_handler(
    State(state): State<AppState>,
    Json(entries): Json<Vec<LogEntry>>,
) -> Json<LogsAccepted> {
    let accepted = state.hub.append_logs(entries);
    Json(LogsAccepted { accepted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{
        Router,
        body::Body,
        http::Request,
        routing::{get, post},
    };
    use drover_types::{Config, Stage, Step, SubmitRequest, Workflow};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(ServerConfig::default().with_long_poll(Duration::from_millis(20)))
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/next", post(next_handler))
            .route("/workflows/{id}/init", post(init_handler))
            .route("/workflows/{id}/wait", get(wait_handler))
            .route("/workflows/{id}/done", post(done_handler))
            .with_state(state)
    }

    fn post_json(uri: &str, body: &impl Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    fn submit(state: &AppState, id: &str) {
        state
            .hub
            .submit(SubmitRequest {
                id: Some(id.into()),
                config: Config::new(vec![Stage::new("s", vec![Step::new("a", "img")])]),
                ..Default::default()
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_next_empty_queue_is_no_content() {
        let response = app(state())
            .oneshot(post_json("/next", &Filter::default()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_next_returns_workflow() {
        let state = state();
        submit(&state, "w1");

        let response = app(state)
            .oneshot(post_json("/next", &Filter::default()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let workflow: Workflow = serde_json::from_slice(&body).unwrap();
        assert_eq!(workflow.id, "w1");
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_not_found() {
        let response = app(state())
            .oneshot(post_json("/workflows/ghost/init", &WorkflowState::default()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wait_pending_then_done_twice() {
        let state = state();
        submit(&state, "w1");
        app(state.clone())
            .oneshot(post_json("/next", &Filter::default()))
            .await
            .unwrap();

        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/workflows/w1/wait")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app(state.clone())
            .oneshot(post_json("/workflows/w1/done", &WorkflowState::default()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app(state)
            .oneshot(post_json("/workflows/w1/done", &WorkflowState::default()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
