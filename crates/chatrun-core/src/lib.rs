//! ChatRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Chat protocols
//! - Runtime specifics
//!
//! All types here describe configured tasks, their matchers, the values
//! tasks return, and the audit events the engine emits.

pub mod error;
pub mod event;
pub mod ids;
pub mod matcher;
pub mod message;
pub mod roster;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{AuditRecord, Event};
pub use ids::{CallerId, RunId, TaskId};
pub use matcher::{massage_regexp, InputMatcher};
pub use message::{IncomingMessage, LogLevel, MessageFormat, Protocol};
pub use roster::{ChannelInfo, UserChanMaps, UserInfo};
pub use status::{DelegateOutcome, RetVal, TaskRetVal};
pub use task::{JobSpec, PluginHelp, PluginSpec, Task, TaskConfig, TaskKind, TaskSource};
