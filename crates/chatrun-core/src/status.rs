//! Return values for tasks, delegates, and robot methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value returned by a task; external tasks report it as their exit code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskRetVal {
    /// Task ran and did nothing in particular.
    #[default]
    Normal,
    /// Task failed, or denied a request.
    Fail,
    /// The mechanism behind the task failed (e.g. a remote service was down).
    MechanismFail,
    /// No usable configuration was found.
    ConfigurationError,
    /// Pipeline was aborted before the task could complete.
    PipelineAborted,
    /// The robot is shutting down.
    RobotStopping,
    /// The task couldn't be found.
    NotFound,
    /// Task explicitly reports success (authorizers and elevators).
    Success,
}

impl TaskRetVal {
    /// Numeric code, also used as the process exit code of external tasks.
    pub fn code(self) -> i32 {
        match self {
            Self::Normal => 0,
            Self::Fail => 1,
            Self::MechanismFail => 2,
            Self::ConfigurationError => 3,
            Self::PipelineAborted => 4,
            Self::RobotStopping => 5,
            Self::NotFound => 6,
            Self::Success => 7,
        }
    }

    /// Map a numeric code back to a TaskRetVal.
    pub fn from_code(code: i32) -> Option<Self> {
        let val = match code {
            0 => Self::Normal,
            1 => Self::Fail,
            2 => Self::MechanismFail,
            3 => Self::ConfigurationError,
            4 => Self::PipelineAborted,
            5 => Self::RobotStopping,
            6 => Self::NotFound,
            7 => Self::Success,
            _ => return None,
        };
        Some(val)
    }

    /// Returns true if the pipeline should continue after this value.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Normal | Self::Success)
    }
}

impl fmt::Display for TaskRetVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "Normal",
            Self::Fail => "Fail",
            Self::MechanismFail => "MechanismFail",
            Self::ConfigurationError => "ConfigurationError",
            Self::PipelineAborted => "PipelineAborted",
            Self::RobotStopping => "RobotStopping",
            Self::NotFound => "NotFound",
            Self::Success => "Success",
        };
        write!(f, "{}({})", s, self.code())
    }
}

/// Result of an authorizer or elevator invocation.
///
/// Only `Success`, `Fail` and `MechanismFail` are valid answers from a
/// security delegate; everything else is a bug in the delegate and is never
/// treated as a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateOutcome {
    Success,
    Fail,
    MechanismFail,
    /// Delegate returned `Normal` instead of `Success`.
    InvalidNormal,
    /// Delegate returned some other code.
    Invalid(TaskRetVal),
}

impl From<TaskRetVal> for DelegateOutcome {
    fn from(ret: TaskRetVal) -> Self {
        match ret {
            TaskRetVal::Success => Self::Success,
            TaskRetVal::Fail => Self::Fail,
            TaskRetVal::MechanismFail => Self::MechanismFail,
            TaskRetVal::Normal => Self::InvalidNormal,
            other => Self::Invalid(other),
        }
    }
}

/// Value returned by robot methods (message sends, attribute lookups, prompts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetVal {
    Ok,
    UserNotFound,
    ChannelNotFound,
    AttributeNotFound,
    FailedMessageSend,
    MissingArguments,
    NoConfigFound,
    ReplyNotMatched,
    TimeoutExpired,
    Interrupted,
    MatcherNotFound,
    InvalidParameter,
    TaskNotFound,
}

impl RetVal {
    /// Numeric code reported over the JSON bridge.
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserNotFound => 1,
            Self::ChannelNotFound => 2,
            Self::AttributeNotFound => 3,
            Self::FailedMessageSend => 4,
            Self::MissingArguments => 5,
            Self::NoConfigFound => 6,
            Self::ReplyNotMatched => 7,
            Self::TimeoutExpired => 8,
            Self::Interrupted => 9,
            Self::MatcherNotFound => 10,
            Self::InvalidParameter => 11,
            Self::TaskNotFound => 12,
        }
    }
}
