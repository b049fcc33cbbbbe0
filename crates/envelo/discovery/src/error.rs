use thiserror::Error;

use crate::engine::DiscoveryState;

/// Errors from the discovery subsystem.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(String),

    #[error("calibration already in progress")]
    CalibrationInProgress,

    #[error("cannot calibrate from state {0}")]
    InvalidTransition(DiscoveryState),

    #[error("calibration discarded: engine was reset while it ran")]
    Superseded,

    #[error(transparent)]
    Boundary(#[from] envelo_boundary::BoundaryError),
}

/// Convenience type alias for discovery results.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = DiscoveryError::InvalidConfig("safety_margin must be >= 0".into());
        assert!(e.to_string().contains("safety_margin"));

        let e = DiscoveryError::InvalidTransition(DiscoveryState::Calibrating);
        assert!(e.to_string().contains("calibrating"));
    }
}
