//! Chat message types exchanged with connectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat protocol a message arrived on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Slack,
    Rocket,
    #[default]
    Terminal,
    Test,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Slack => "slack",
            Protocol::Rocket => "rocket",
            Protocol::Terminal => "terminal",
            Protocol::Test => "test",
        };
        f.write_str(s)
    }
}

/// How a connector should render an outgoing message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageFormat {
    #[default]
    Raw,
    Fixed,
    Variable,
}

impl MessageFormat {
    /// Parse a format name, falling back to `default` when unrecognized.
    pub fn parse_or(s: &str, default: MessageFormat) -> MessageFormat {
        match s.to_ascii_lowercase().as_str() {
            "raw" => MessageFormat::Raw,
            "fixed" => MessageFormat::Fixed,
            "variable" => MessageFormat::Variable,
            _ => default,
        }
    }
}

/// Log levels accepted from tasks (e.g. over the JSON bridge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Audit,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name; unknown names log at Info.
    pub fn parse(s: &str) -> LogLevel {
        match s.to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "audit" => LogLevel::Audit,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "Trace",
            LogLevel::Debug => "Debug",
            LogLevel::Info => "Info",
            LogLevel::Audit => "Audit",
            LogLevel::Warn => "Warn",
            LogLevel::Error => "Error",
        }
    }
}

/// A message as delivered by a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Protocol the message arrived on.
    pub protocol: Protocol,
    /// User name of the sender.
    pub user: String,
    /// Protocol-native user ID (`<id>`), if the connector knows it.
    pub protocol_user: String,
    /// Channel name, empty for a direct message.
    pub channel: String,
    /// Protocol-native channel ID (`<id>`), if the connector knows it.
    pub protocol_channel: String,
    /// Message text.
    pub text: String,
    /// Whether the message was sent directly to the robot.
    pub direct: bool,
    /// Whether the sender is another bot/program.
    pub bot_user: bool,
    /// Unix timestamp (milliseconds) when the message was received.
    pub timestamp_ms: i64,
}

impl IncomingMessage {
    /// Create a channel message.
    pub fn channel(
        user: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            channel: channel.into(),
            text: text.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// Create a direct message.
    pub fn direct(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            text: text.into(),
            direct: true,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// Builder method to set the protocol.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}
