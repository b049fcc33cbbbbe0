use envelo_discovery::DiscoveryState;
use thiserror::Error;

/// Errors from the enforcement agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Registration failed on every attempt and the agent is fail-closed.
    #[error("connectivity lost: authority unreachable after {attempts} attempts: {reason}")]
    ConnectivityLost { attempts: u32, reason: String },

    /// Returned by `enforce` when the action violates the envelope.
    #[error("action {action_id} blocked: {}", .violations.join("; "))]
    Blocked {
        action_id: String,
        violations: Vec<String>,
    },

    #[error("boundary already registered: {0}")]
    DuplicateBoundary(String),

    #[error("no authority configured")]
    Standalone,

    #[error("discovery has not produced an envelope (state {0})")]
    DiscoveryIncomplete(DiscoveryState),

    #[error("authority returned {status}: {message}")]
    Authority { status: u16, message: String },

    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Boundary(#[from] envelo_boundary::BoundaryError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, AgentError::Blocked { .. })
    }
}

/// Convenience type alias for agent results.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_lists_violations() {
        let e = AgentError::Blocked {
            action_id: "ses-1-00000001".into(),
            violations: vec!["speed too high".into(), "outside fence".into()],
        };
        assert!(e.is_blocked());
        let msg = e.to_string();
        assert!(msg.contains("ses-1-00000001"));
        assert!(msg.contains("speed too high; outside fence"));
    }

    #[test]
    fn connectivity_message() {
        let e = AgentError::ConnectivityLost {
            attempts: 3,
            reason: "connection refused".into(),
        };
        assert!(e.to_string().contains("3 attempts"));
        assert!(!e.is_blocked());
    }
}
