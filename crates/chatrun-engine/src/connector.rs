//! Chat connectors.

use async_trait::async_trait;
use chatrun_core::{MessageFormat, RetVal};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// Outgoing side of a chat protocol.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn send_channel_message(&self, channel: &str, msg: &str, format: MessageFormat)
        -> RetVal;

    async fn send_user_channel_message(
        &self,
        user: &str,
        channel: &str,
        msg: &str,
        format: MessageFormat,
    ) -> RetVal;

    async fn send_user_message(&self, user: &str, msg: &str, format: MessageFormat) -> RetVal;

    /// Protocol-provided user attribute, used when the roster has none.
    fn user_attribute(&self, _user: &str, _attr: &str) -> Option<String> {
        None
    }
}

/// Connector writing to stdout, for running the robot in a terminal.
pub struct TerminalConnector {
    out: Mutex<Stdout>,
}

impl TerminalConnector {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn emit(&self, line: String) -> RetVal {
        let mut out = self.out.lock().await;
        let written = async {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        }
        .await;
        match written {
            Ok(()) => RetVal::Ok,
            Err(_) => RetVal::FailedMessageSend,
        }
    }
}

impl Default for TerminalConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn render(msg: &str, format: MessageFormat) -> String {
    match format {
        MessageFormat::Fixed => format!("```\n{}\n```", msg),
        _ => msg.to_string(),
    }
}

#[async_trait]
impl Connector for TerminalConnector {
    async fn send_channel_message(
        &self,
        channel: &str,
        msg: &str,
        format: MessageFormat,
    ) -> RetVal {
        self.emit(format!("#{}: {}", channel, render(msg, format))).await
    }

    async fn send_user_channel_message(
        &self,
        user: &str,
        channel: &str,
        msg: &str,
        format: MessageFormat,
    ) -> RetVal {
        self.emit(format!("#{}: @{} {}", channel, user, render(msg, format)))
            .await
    }

    async fn send_user_message(&self, user: &str, msg: &str, format: MessageFormat) -> RetVal {
        self.emit(format!("(dm:{}): {}", user, render(msg, format))).await
    }
}
