use thiserror::Error;

/// Errors raised while building or loading boundaries.
///
/// These are construction-time failures: a boundary that fails validation is
/// never created. Evaluation-time problems are reported as [`CheckError`]s
/// folded into a failed [`CheckResult`] instead.
#[derive(Error, Debug)]
pub enum BoundaryError {
    #[error("invalid boundary config for '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("duplicate boundary name: {0}")]
    DuplicateName(String),

    #[error("malformed boundary definition: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoundaryError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        BoundaryError::InvalidConfig {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Per-check type errors. Always treated as a failed check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("value is not numeric: {0}")]
    NotNumeric(String),

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),
}

/// Outcome of a single boundary check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckResult {
    /// Value is inside the boundary
    Pass,
    /// Value violates the boundary; carries a human-readable reason
    Violation(String),
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        matches!(self, CheckResult::Pass)
    }

    pub fn is_violation(&self) -> bool {
        !self.passed()
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CheckResult::Pass => None,
            CheckResult::Violation(msg) => Some(msg),
        }
    }
}

impl From<CheckError> for CheckResult {
    fn from(err: CheckError) -> Self {
        CheckResult::Violation(err.to_string())
    }
}

/// Convenience type alias for boundary results.
pub type BoundaryResult<T> = Result<T, BoundaryError>;
