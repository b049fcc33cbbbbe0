//! # envelo-agent
//!
//! Runtime enforcement for an operating envelope.
//!
//! An [`Agent`] holds the active boundary set and evaluates every proposed
//! action against it. Verdicts are local and synchronous; an optional
//! certification authority receives session registration, heartbeats and
//! batched telemetry in the background. Telemetry the authority does not
//! accept is written to a JSONL [`FallbackLog`].
//!
//! ```no_run
//! use envelo_agent::{Agent, AgentConfig};
//! use serde_json::json;
//!
//! # async fn run() -> envelo_agent::AgentResult<()> {
//! let agent = Agent::start(AgentConfig::standalone("rover-1")).await?;
//! let params = json!({"speed": 12.0}).as_object().cloned().unwrap_or_default();
//! let moved = agent.enforce(&params, || "moving")?;
//! # let _ = moved;
//! agent.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod agent;
pub mod authority;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod telemetry;
mod worker;

pub use agent::{Agent, AgentStats, BoundarySet, SafeStateCallback};
pub use authority::{
    AuthorityClient, Heartbeat, HttpAuthorityClient, SessionAck, SessionRegistration,
    SessionSummary, TelemetryBatch,
};
pub use config::{AgentConfig, AuthorityConfig};
pub use error::{AgentError, AgentResult};
pub use evaluation::{BoundaryEvaluation, Evaluation};
pub use telemetry::{FallbackLog, TelemetryRecord, TelemetryStats};
pub use worker::HEARTBEAT_FAILURE_THRESHOLD;
