//! HTTP API for the local enforcement server

pub mod rest;

pub use rest::router::{create_router, VERSION_HEADER};
pub use rest::state::AppState;
