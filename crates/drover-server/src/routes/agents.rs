//! Agent registry endpoints.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use drover_types::{AgentInfo, RegisterResponse};
use serde::{Deserialize, Serialize};

use crate::auth::AgentId;
use crate::error::{Result, ServerError};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: i64,
    pub info: AgentInfo,
}

/// Response for listing agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<AgentSummary>,
    pub total: usize,
}

fn require_agent(agent: AgentId) -> Result<i64> {
    agent
        .0
        .ok_or_else(|| ServerError::BadRequest("missing agent id header".to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/agents
pub async fn register_agent_handler(
    State(state): State<AppState>,
    Json(info): Json<AgentInfo>,
) -> Json<RegisterResponse> {
    let agent_id = state.hub.register_agent(info);
    Json(RegisterResponse { agent_id })
}

/// DELETE /api/v1/agents/self
pub async fn unregister_agent_handler(
    State(state): State<AppState>,
    agent: AgentId,
) -> Result<StatusCode> {
    state.hub.unregister_agent(require_agent(agent)?);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/agents/self/health
pub async fn health_report_handler(
    State(state): State<AppState>,
    agent: AgentId,
) -> Result<StatusCode> {
    state.hub.report_health(require_agent(agent)?)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/agents
pub async fn list_agents_handler(State(state): State<AppState>) -> Json<ListAgentsResponse> {
    let agents: Vec<AgentSummary> = state
        .hub
        .agents()
        .into_iter()
        .map(|(id, info)| AgentSummary { id, info })
        .collect();
    let total = agents.len();
    Json(ListAgentsResponse { agents, total })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
