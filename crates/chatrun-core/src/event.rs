//! Audit events emitted by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of audit event.
///
/// Every authorization and elevation branch maps to exactly one of these,
/// so the event stream distinguishes "never ran" from "ran and failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    IgnoredUser,
    BotDirectMessage,
    AdminCheckPassed,
    AdminCheckFailed,
    MultipleMatchesNoAction,
    /// Authorization required, but no authorizer is configured.
    AuthNoRunMisconfigured,
    /// The authorizer is disabled.
    AuthNoRunPlugNotAvailable,
    AuthRanSuccess,
    AuthRanFail,
    AuthRanMechanismFailed,
    /// Authorizer returned Normal instead of Success.
    AuthRanFailNormal,
    /// Authorizer returned some other unexpected value.
    AuthRanFailOther,
    /// The configured authorizer doesn't exist or isn't a plugin.
    AuthNoRunNotFound,
    ElevNoRunMisconfigured,
    ElevNoRunNotAvailable,
    ElevRanSuccess,
    ElevRanFail,
    ElevRanMechanismFailed,
    ElevRanFailNormal,
    ElevRanFailOther,
    ElevNoRunNotFound,
    CommandTaskRan,
    AmbientTaskRan,
    CatchAllsRan,
    CatchAllTaskRan,
    TriggeredTaskRan,
    SpawnedTaskRan,
    JobTaskRan,
    BuiltinTaskRan,
    ExternalTaskBadPath,
    ExternalTaskRan,
    ExternalTaskErrExit,
}

impl Event {
    /// All events, in declaration order.
    pub const ALL: &'static [Event] = &[
        Event::IgnoredUser,
        Event::BotDirectMessage,
        Event::AdminCheckPassed,
        Event::AdminCheckFailed,
        Event::MultipleMatchesNoAction,
        Event::AuthNoRunMisconfigured,
        Event::AuthNoRunPlugNotAvailable,
        Event::AuthRanSuccess,
        Event::AuthRanFail,
        Event::AuthRanMechanismFailed,
        Event::AuthRanFailNormal,
        Event::AuthRanFailOther,
        Event::AuthNoRunNotFound,
        Event::ElevNoRunMisconfigured,
        Event::ElevNoRunNotAvailable,
        Event::ElevRanSuccess,
        Event::ElevRanFail,
        Event::ElevRanMechanismFailed,
        Event::ElevRanFailNormal,
        Event::ElevRanFailOther,
        Event::ElevNoRunNotFound,
        Event::CommandTaskRan,
        Event::AmbientTaskRan,
        Event::CatchAllsRan,
        Event::CatchAllTaskRan,
        Event::TriggeredTaskRan,
        Event::SpawnedTaskRan,
        Event::JobTaskRan,
        Event::BuiltinTaskRan,
        Event::ExternalTaskBadPath,
        Event::ExternalTaskRan,
        Event::ExternalTaskErrExit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Event::IgnoredUser => "IgnoredUser",
            Event::BotDirectMessage => "BotDirectMessage",
            Event::AdminCheckPassed => "AdminCheckPassed",
            Event::AdminCheckFailed => "AdminCheckFailed",
            Event::MultipleMatchesNoAction => "MultipleMatchesNoAction",
            Event::AuthNoRunMisconfigured => "AuthNoRunMisconfigured",
            Event::AuthNoRunPlugNotAvailable => "AuthNoRunPlugNotAvailable",
            Event::AuthRanSuccess => "AuthRanSuccess",
            Event::AuthRanFail => "AuthRanFail",
            Event::AuthRanMechanismFailed => "AuthRanMechanismFailed",
            Event::AuthRanFailNormal => "AuthRanFailNormal",
            Event::AuthRanFailOther => "AuthRanFailOther",
            Event::AuthNoRunNotFound => "AuthNoRunNotFound",
            Event::ElevNoRunMisconfigured => "ElevNoRunMisconfigured",
            Event::ElevNoRunNotAvailable => "ElevNoRunNotAvailable",
            Event::ElevRanSuccess => "ElevRanSuccess",
            Event::ElevRanFail => "ElevRanFail",
            Event::ElevRanMechanismFailed => "ElevRanMechanismFailed",
            Event::ElevRanFailNormal => "ElevRanFailNormal",
            Event::ElevRanFailOther => "ElevRanFailOther",
            Event::ElevNoRunNotFound => "ElevNoRunNotFound",
            Event::CommandTaskRan => "CommandTaskRan",
            Event::AmbientTaskRan => "AmbientTaskRan",
            Event::CatchAllsRan => "CatchAllsRan",
            Event::CatchAllTaskRan => "CatchAllTaskRan",
            Event::TriggeredTaskRan => "TriggeredTaskRan",
            Event::SpawnedTaskRan => "SpawnedTaskRan",
            Event::JobTaskRan => "JobTaskRan",
            Event::BuiltinTaskRan => "BuiltinTaskRan",
            Event::ExternalTaskBadPath => "ExternalTaskBadPath",
            Event::ExternalTaskRan => "ExternalTaskRan",
            Event::ExternalTaskErrExit => "ExternalTaskErrExit",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An emitted audit event with the identity it concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Type of event.
    pub event: Event,
    /// Task the event concerns (may be empty).
    pub task: String,
    /// User the event concerns (may be empty).
    pub user: String,
    /// Channel the event concerns (may be empty).
    pub channel: String,
    /// Human-readable detail, as written to the audit log.
    pub message: String,
    /// Unix timestamp (milliseconds) when the event occurred.
    pub timestamp_ms: i64,
}

impl AuditRecord {
    /// Create a new audit record stamped with the current time.
    pub fn new(
        event: Event,
        task: impl Into<String>,
        user: impl Into<String>,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event,
            task: task.into(),
            user: user.into(),
            channel: channel.into(),
            message: message.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_event_names_are_unique() {
        let names: HashSet<&str> = Event::ALL.iter().map(Event::name).collect();
        assert_eq!(names.len(), Event::ALL.len());
    }

    #[test]
    fn test_audit_record_new() {
        let rec = AuditRecord::new(Event::AuthRanFail, "deploy", "alice", "ops", "denied");
        assert_eq!(rec.event, Event::AuthRanFail);
        assert_eq!(rec.task, "deploy");
        assert!(rec.timestamp_ms > 0);
    }
}
