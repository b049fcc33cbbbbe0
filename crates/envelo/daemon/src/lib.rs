//! Envelo daemon library
//!
//! Serves one enforcement agent over HTTP so callers in any language can
//! use it as a sidecar:
//! - `POST /check` and `POST /enforce` evaluate an action
//! - `GET /status` and `GET /boundaries` report counters and the rule set
//! - `GET /health` reflects whether the agent is running

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use api::{create_router, AppState, VERSION_HEADER};
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
