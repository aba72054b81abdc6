//! The JSON bridge: robot methods for external tasks.
//!
//! External tasks get `CHATRUN_HTTP_POST` and `CHATRUN_CALLER_ID` in their
//! environment and post function calls to `/json`. The caller ID ties the
//! call back to the originating run.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chatrun_core::{LogLevel, MessageFormat, RetVal, TaskId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::http::responses::{
    decode, encode, AttributeArgs, AttributeResponse, ChannelMessageArgs, ErrorResponse,
    JsonFunction, LogArgs, ReplyArgs, ReplyResponse, RetValResponse, UserAttributeArgs,
    UserChannelMessageArgs, UserMessageArgs,
};
use crate::robot::{Robot, DEFAULT_REPLY_TIMEOUT};
use crate::state::BotState;

fn bad_request(error: impl Into<String>) -> Response {
    let error = error.into();
    warn!(error = %error, "Rejected JSON function call");
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
}

fn args<T: DeserializeOwned>(func: &str, value: Value) -> Result<T, Response> {
    serde_json::from_value(value)
        .map_err(|e| bad_request(format!("couldn't decipher arguments for {}: {}", func, e)))
}

fn attribute(result: Result<String, RetVal>) -> Response {
    let (value, ret) = match result {
        Ok(v) => (v, RetVal::Ok),
        Err(ret) => (String::new(), ret),
    };
    Json(AttributeResponse {
        attribute: encode(&value),
        bot_ret_val: ret.code(),
    })
    .into_response()
}

fn ret_val(ret: RetVal) -> Response {
    Json(RetValResponse {
        bot_ret_val: ret.code(),
    })
    .into_response()
}

/// The run's robot, adjusted for the caller's user, channel, format and
/// plugin.
fn caller_robot(state: &BotState, f: &JsonFunction) -> Option<Robot> {
    let handle = state.get_bot_context_eid(&f.caller_id)?;
    let mut robot = handle.robot();
    if !f.user.is_empty() {
        robot.user = f.user.clone();
    }
    if !f.channel.is_empty() {
        robot.channel = f.channel.clone();
    }
    robot.format = MessageFormat::parse_or(&f.format, robot.format);
    if !f.plugin_id.is_empty() {
        let task = robot
            .tasks
            .get_task_by_id(&TaskId::new(f.plugin_id.as_str()))
            .cloned();
        if let Some(task) = task {
            robot = robot.with_task(task);
        }
    }
    Some(robot)
}

/// `POST /json`
pub async fn json_function(State(state): State<Arc<BotState>>, body: Bytes) -> Response {
    let f: JsonFunction = match serde_json::from_slice(&body) {
        Ok(f) => f,
        Err(e) => return bad_request(format!("couldn't decipher JSON command: {}", e)),
    };
    let Some(robot) = caller_robot(&state, &f) else {
        return bad_request(format!("no active run for caller '{}'", f.caller_id));
    };
    debug!(func = %f.func_name, run_id = ?robot.run_id(), "JSON function call");

    match call(&robot, &f.func_name, f.func_args).await {
        Ok(resp) | Err(resp) => resp,
    }
}

async fn call(robot: &Robot, func: &str, fargs: Value) -> Result<Response, Response> {
    let resp = match func {
        "GetSenderAttribute" => {
            let a: AttributeArgs = args(func, fargs)?;
            attribute(robot.get_sender_attribute(&a.attribute))
        }
        "GetBotAttribute" => {
            let a: AttributeArgs = args(func, fargs)?;
            attribute(robot.get_bot_attribute(&a.attribute))
        }
        "GetUserAttribute" => {
            let a: UserAttributeArgs = args(func, fargs)?;
            attribute(robot.get_user_attribute(&a.user, &a.attribute))
        }
        "LogMessage" => {
            let a: LogArgs = args(func, fargs)?;
            robot.log(LogLevel::parse(&a.level), &decode(&a.message));
            ret_val(RetVal::Ok)
        }
        "SendChannelMessage" => {
            let a: ChannelMessageArgs = args(func, fargs)?;
            ret_val(robot.send_channel_message(&a.channel, &decode(&a.message)).await)
        }
        "SendUserChannelMessage" => {
            let a: UserChannelMessageArgs = args(func, fargs)?;
            ret_val(
                robot
                    .send_user_channel_message(&a.user, &a.channel, &decode(&a.message))
                    .await,
            )
        }
        "SendUserMessage" => {
            let a: UserMessageArgs = args(func, fargs)?;
            ret_val(robot.send_user_message(&a.user, &decode(&a.message)).await)
        }
        "WaitForReply" => {
            let a: ReplyArgs = args(func, fargs)?;
            let timeout = if a.timeout == 0 {
                DEFAULT_REPLY_TIMEOUT
            } else {
                Duration::from_secs(a.timeout)
            };
            let (reply, ret) = match robot.wait_for_reply(&a.regex_id, timeout).await {
                Ok(reply) => (reply, RetVal::Ok),
                Err(ret) => (String::new(), ret),
            };
            Json(ReplyResponse {
                reply: encode(&reply),
                bot_ret_val: ret.code(),
            })
            .into_response()
        }
        other => return Err(bad_request(format!("unknown function '{}'", other))),
    };
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::RunContext;
    use crate::testutil::{test_state, RecordingConnector, Sent};
    use chatrun_core::IncomingMessage;
    use serde_json::json;

    async fn post(state: &Arc<BotState>, body: Value) -> (StatusCode, Value) {
        let resp = json_function(State(state.clone()), Bytes::from(body.to_string())).await;
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn active_run(state: &Arc<BotState>) -> (RunContext, String) {
        let mut ctx = RunContext::from_message(state, &IncomingMessage::channel("alice", "ops", ""));
        ctx.register_active(None);
        let eid = ctx.eid().unwrap().as_str().to_string();
        (ctx, eid)
    }

    fn setup() -> (Arc<BotState>, Arc<RecordingConnector>) {
        let mut cfg = Config::default();
        cfg.bot_info.full_name = "Chat Runner".into();
        test_state(cfg)
    }

    #[tokio::test]
    async fn test_send_messages_decodes_base64() {
        let (state, conn) = setup();
        let (_ctx, eid) = active_run(&state);

        let (status, body) = post(
            &state,
            json!({
                "FuncName": "SendChannelMessage",
                "CallerID": eid,
                "FuncArgs": { "Channel": "ops", "Message": encode("deployed") },
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["BotRetVal"], 0);

        post(
            &state,
            json!({
                "FuncName": "SendUserMessage",
                "CallerID": eid,
                "FuncArgs": { "User": "bob", "Message": "plain" },
            }),
        )
        .await;
        assert_eq!(
            conn.sent(),
            vec![
                Sent { user: "".into(), channel: "ops".into(), msg: "deployed".into() },
                Sent { user: "bob".into(), channel: "".into(), msg: "plain".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_attributes_are_encoded() {
        let (state, _) = setup();
        let (_ctx, eid) = active_run(&state);

        let (_, body) = post(
            &state,
            json!({
                "FuncName": "GetBotAttribute",
                "CallerID": eid,
                "FuncArgs": { "Attribute": "fullname" },
            }),
        )
        .await;
        assert_eq!(body["BotRetVal"], 0);
        assert_eq!(decode(body["Attribute"].as_str().unwrap()), "Chat Runner");

        let (_, body) = post(
            &state,
            json!({
                "FuncName": "GetUserAttribute",
                "CallerID": eid,
                "FuncArgs": { "User": "nobody", "Attribute": "email" },
            }),
        )
        .await;
        assert_eq!(body["BotRetVal"], RetVal::UserNotFound.code());
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (state, _) = setup();
        let (_ctx, eid) = active_run(&state);

        let resp = json_function(State(state.clone()), Bytes::from_static(b"not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let (status, _) = post(&state, json!({ "FuncName": "Frobnicate", "CallerID": eid })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(
            &state,
            json!({ "FuncName": "LogMessage", "CallerID": eid, "FuncArgs": { "Level": 3 } }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(
            &state,
            json!({ "FuncName": "LogMessage", "CallerID": "00000000",
                    "FuncArgs": { "Level": "info", "Message": "hi" } }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_wait_for_reply() {
        let (state, _) = setup();
        let (_ctx, eid) = active_run(&state);

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                post(
                    &state,
                    json!({
                        "FuncName": "WaitForReply",
                        "CallerID": eid,
                        "FuncArgs": { "RegExId": "YesNo", "Timeout": 10 },
                    }),
                )
                .await
            })
        };
        while !state.replies.deliver("alice", "ops", "yes") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (status, body) = waiter.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["BotRetVal"], 0);
        assert_eq!(decode(body["Reply"].as_str().unwrap()), "yes");
    }
}
