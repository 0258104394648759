//! `Runtime.evaluate` requests and reply decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

pub const EVALUATE_METHOD: &str = "Runtime.evaluate";

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateRequest<'a> {
    pub id: u64,
    pub method: &'static str,
    pub params: EvaluateParams<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams<'a> {
    pub expression: &'a str,
    pub await_promise: bool,
    pub return_by_value: bool,
}

impl<'a> EvaluateRequest<'a> {
    pub fn new(id: u64, expression: &'a str) -> Self {
        Self {
            id,
            method: EVALUATE_METHOD,
            params: EvaluateParams {
                expression,
                await_promise: true,
                return_by_value: true,
            },
        }
    }
}

/// Outcome of one evaluation inside the desktop app.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Value(Value),
    Undefined,
    RemoteError {
        description: String,
        status: Option<i64>,
    },
}

#[derive(Debug, Deserialize)]
struct EvaluateReply {
    #[serde(default)]
    result: Option<RemoteObject>,
    #[serde(default, rename = "exceptionDetails")]
    exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Deserialize)]
struct RemoteObject {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    exception: Option<RemoteObject>,
}

/// Decodes one inbound message for request `expected_id`.
///
/// `Ok(None)` means the message was an id-less event and the caller should keep reading.
pub fn decode_reply(expected_id: u64, message: &Value) -> BridgeResult<Option<ExecutionResult>> {
    let Some(id) = message.get("id") else {
        return Ok(None);
    };
    if !matches_id(id, expected_id) {
        return Err(BridgeError::Protocol(format!(
            "reply id {id} does not match request {expected_id}"
        )));
    }
    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(BridgeError::Protocol(format!(
            "debugger rejected request {expected_id}: {text}"
        )));
    }
    let result = message
        .get("result")
        .ok_or_else(|| BridgeError::Protocol(format!("reply {expected_id} carries no result")))?;
    let reply: EvaluateReply = serde_json::from_value(result.clone())
        .map_err(|err| BridgeError::Protocol(format!("malformed evaluation result: {err}")))?;
    decode_evaluation(reply).map(Some)
}

fn decode_evaluation(reply: EvaluateReply) -> BridgeResult<ExecutionResult> {
    let thrown = reply.exception_details.is_some()
        || reply
            .result
            .as_ref()
            .and_then(|obj| obj.subtype.as_deref())
            == Some("error");
    if thrown {
        return Ok(remote_error(reply));
    }

    let Some(object) = reply.result else {
        return Err(BridgeError::Protocol(
            "evaluation result has no remote object".to_string(),
        ));
    };
    match object.kind.as_str() {
        "undefined" => Ok(ExecutionResult::Undefined),
        "string" => {
            let text = match object.value {
                Some(Value::String(text)) => text,
                Some(other) => return Ok(ExecutionResult::Value(other)),
                None => String::new(),
            };
            // structured results cross the channel as JSON text
            match serde_json::from_str(&text) {
                Ok(value) => Ok(ExecutionResult::Value(value)),
                Err(err) => {
                    debug!(error = %err, "string result is not JSON; relaying as text");
                    Ok(ExecutionResult::Value(Value::String(text)))
                }
            }
        }
        _ => Ok(ExecutionResult::Value(object.value.unwrap_or(Value::Null))),
    }
}

fn remote_error(reply: EvaluateReply) -> ExecutionResult {
    let details = reply.exception_details;
    let exception = details.as_ref().and_then(|d| d.exception.as_ref());
    let description = exception
        .and_then(|obj| obj.description.clone())
        .or_else(|| reply.result.as_ref().and_then(|obj| obj.description.clone()))
        .or_else(|| details.as_ref().and_then(|d| d.text.clone()))
        .unwrap_or_else(|| "remote evaluation threw".to_string());
    let status = exception
        .or(reply.result.as_ref())
        .and_then(|obj| obj.value.as_ref())
        .and_then(|value| value.get("status"))
        .and_then(Value::as_i64);
    ExecutionResult::RemoteError {
        description,
        status,
    }
}

fn matches_id(value: &Value, expected: u64) -> bool {
    match value {
        Value::Number(num) => num.as_u64() == Some(expected),
        Value::String(text) => text.parse::<u64>().ok() == Some(expected),
        _ => false,
    }
}
