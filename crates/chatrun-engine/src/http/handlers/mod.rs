//! HTTP request handlers.

mod health;
mod json;

pub use health::{health_check, metrics_handler};
pub use json::json_function;
