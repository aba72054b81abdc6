//! HTTP request and response types.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

const BASE64_PREFIX: &str = "base64:";

// ============================================================================
// JSON bridge request types
// ============================================================================

/// A robot method call from an external task.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JsonFunction {
    pub func_name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub format: String,
    #[serde(rename = "PluginID", default)]
    pub plugin_id: String,
    #[serde(rename = "CallerID", default)]
    pub caller_id: String,
    #[serde(default)]
    pub func_args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeArgs {
    pub attribute: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAttributeArgs {
    pub user: String,
    pub attribute: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogArgs {
    pub level: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelMessageArgs {
    pub channel: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserMessageArgs {
    pub user: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserChannelMessageArgs {
    pub user: String,
    pub channel: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplyArgs {
    #[serde(rename = "RegExId")]
    pub regex_id: String,
    /// Seconds; 0 means the default timeout.
    #[serde(default)]
    pub timeout: u64,
}

// ============================================================================
// JSON bridge response types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeResponse {
    pub attribute: String,
    pub bot_ret_val: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetValResponse {
    pub bot_ret_val: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplyResponse {
    pub reply: String,
    pub bot_ret_val: i32,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Encoding
// ============================================================================

/// Strip and decode a `base64:` prefix. Undecodable input is returned as is.
pub fn decode(msg: &str) -> String {
    let Some(encoded) = msg.strip_prefix(BASE64_PREFIX) else {
        return msg.to_string();
    };
    match STANDARD.decode(encoded) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(error = %e, "Unable to decode base64 message");
            encoded.to_string()
        }
    }
}

pub fn encode(s: &str) -> String {
    format!("{}{}", BASE64_PREFIX, STANDARD.encode(s))
}
