//! Health and status handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, http::StatusCode, Json};
use envelo_agent::AgentStats;
use envelo_boundary::BoundaryStatus;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint: 200 while the agent runs, 503 otherwise
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthCheckResponse>) {
    let running = state.running_agent().is_ok();
    let (code, status) = if running {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        code,
        Json(HealthCheckResponse {
            status: status.to_string(),
            version: state.version.clone(),
            uptime: state.uptime(),
        }),
    )
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub agent: AgentStats,
}

/// Agent counters and uptime
pub async fn daemon_status(State(state): State<AppState>) -> ApiResult<Json<DaemonStatusResponse>> {
    let agent = state.agent()?;
    let stats = agent.stats();
    Ok(Json(DaemonStatusResponse {
        status: if stats.running { "running" } else { "stopped" }.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        agent: stats,
    }))
}

/// Active boundary set response
#[derive(Debug, Serialize)]
pub struct BoundariesResponse {
    pub count: usize,
    pub boundaries: Vec<BoundaryStatus>,
}

/// Current serialized rule set with live counters
pub async fn list_boundaries(State(state): State<AppState>) -> ApiResult<Json<BoundariesResponse>> {
    let boundaries = state.agent()?.boundary_statuses();
    Ok(Json(BoundariesResponse {
        count: boundaries.len(),
        boundaries,
    }))
}
