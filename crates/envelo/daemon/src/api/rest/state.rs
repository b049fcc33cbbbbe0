//! Application state for API handlers

use crate::error::{ApiError, ApiResult};
use envelo_agent::Agent;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The enforcement agent served by this process
    pub agent: Option<Arc<Agent>>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent: Some(agent),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// State with no agent attached; every agent endpoint answers 503.
    pub fn detached() -> Self {
        Self {
            agent: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// The agent, if one is attached.
    pub fn agent(&self) -> ApiResult<&Arc<Agent>> {
        self.agent.as_ref().ok_or(ApiError::AgentUnavailable)
    }

    /// The agent, if attached and still accepting evaluations.
    pub fn running_agent(&self) -> ApiResult<&Arc<Agent>> {
        self.agent()
            .ok()
            .filter(|agent| agent.is_running())
            .ok_or(ApiError::AgentUnavailable)
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
