//! REST API handlers

mod enforcement;
mod health;

pub use enforcement::*;
pub use health::*;
