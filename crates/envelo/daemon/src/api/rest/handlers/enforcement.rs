//! Evaluation handlers
//!
//! Both endpoints take the action parameters as a flat JSON object and
//! return the full evaluation. They differ only in the status code of a
//! blocked verdict.

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{extract::State, Json};
use envelo_agent::Evaluation;
use serde_json::{Map, Value};

/// Evaluate; always 200, the verdict is in the body
pub async fn check_action(
    State(state): State<AppState>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<Json<Evaluation>> {
    let agent = state.running_agent()?;
    Ok(Json(agent.evaluate(&params)))
}

/// Evaluate; 403 with the evaluation as details when blocked
pub async fn enforce_action(
    State(state): State<AppState>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<Json<Evaluation>> {
    let agent = state.running_agent()?;
    let evaluation = agent.evaluate(&params);
    if evaluation.allowed {
        Ok(Json(evaluation))
    } else {
        tracing::info!(action_id = %evaluation.action_id, "enforce request blocked");
        Err(ApiError::Blocked(Box::new(evaluation)))
    }
}
