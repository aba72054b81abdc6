//! ChatRun Engine Library
//!
//! This crate provides the robot engine for ChatRun: message dispatch,
//! task loading, run contexts, pipelines, security delegation, history
//! and the HTTP bridge for external tasks.

pub mod authorize;
pub mod available;
pub mod brain;
pub mod builtins;
pub mod config;
pub mod connector;
pub mod context;
pub mod debug;
pub mod dispatch;
pub mod elevate;
pub mod error;
pub mod events;
pub mod exclusive;
pub mod external;
pub mod history;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod replies;
pub mod robot;
pub mod state;
pub mod taskconf;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use context::RunContext;
pub use dispatch::{handle_message, Dispatch};
pub use error::EngineError;
pub use registry::{PluginHandler, RegisteredPlugin};
pub use robot::Robot;
pub use state::BotState;
