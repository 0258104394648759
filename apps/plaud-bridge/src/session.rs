//! API calls performed by the desktop app on the bridge's behalf.
//!
//! The bridge holds no credentials. Every call is a small script evaluated inside the
//! app that invokes the app's own authenticated fetch function and hands the result
//! back as JSON text.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::channel::{ExecutionResult, RemoteChannel};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

pub const NOT_LOGGED_IN: &str = "not logged in";

/// Capability every credential source offers to the client.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Never fails; reports whether calls can currently be made.
    async fn is_available(&self) -> bool;

    async fn call(
        &self,
        endpoint: &str,
        params: Option<&Map<String, Value>>,
    ) -> BridgeResult<Value>;
}

pub struct SessionProxy {
    channel: RemoteChannel,
    fetch_path: Vec<String>,
}

impl SessionProxy {
    pub fn new(channel: RemoteChannel, fetch_function: &str) -> Self {
        Self {
            channel,
            fetch_path: fetch_function
                .split('.')
                .map(str::trim)
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(RemoteChannel::from_config(config), &config.fetch_function)
    }
}

#[async_trait]
impl SessionApi for SessionProxy {
    async fn is_available(&self) -> bool {
        self.channel.probe().await
    }

    async fn call(
        &self,
        endpoint: &str,
        params: Option<&Map<String, Value>>,
    ) -> BridgeResult<Value> {
        let snippet = build_snippet(&self.fetch_path, endpoint, params);
        debug!(endpoint, "proxying API call through desktop session");
        match self.channel.evaluate(&snippet).await? {
            ExecutionResult::Value(payload) => interpret_payload(payload),
            ExecutionResult::Undefined => Ok(Value::Null),
            ExecutionResult::RemoteError {
                description,
                status,
            } => Err(BridgeError::Remote {
                description,
                status,
            }),
        }
    }
}

/// Script that calls the app's fetch function and returns its result as JSON text.
pub fn build_snippet(
    fetch_path: &[String],
    endpoint: &str,
    params: Option<&Map<String, Value>>,
) -> String {
    let path = Value::from(fetch_path.to_vec());
    let endpoint = Value::from(endpoint);
    let params = params.cloned().map(Value::Object).unwrap_or(Value::Null);
    let not_logged_in = serde_json::json!({ "error": NOT_LOGGED_IN });
    format!(
        r#"(async () => {{
  const path = {path};
  let owner = globalThis;
  for (const key of path.slice(0, -1)) {{
    owner = owner == null ? undefined : owner[key];
  }}
  const fetchFn = owner == null || path.length === 0 ? undefined : owner[path[path.length - 1]];
  if (typeof fetchFn !== "function") {{
    return JSON.stringify({not_logged_in});
  }}
  const result = await fetchFn.call(owner, {endpoint}, {params});
  return JSON.stringify(result === undefined ? null : result);
}})()"#
    )
}

/// Payloads carrying an `error` member become typed API errors.
pub fn interpret_payload(payload: Value) -> BridgeResult<Value> {
    let Some(error) = payload.get("error").filter(|error| !error.is_null()) else {
        return Ok(payload);
    };
    let message = match error {
        Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| other.to_string()),
    };
    let status = ["status", "status_code", "code"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_i64))
        .unwrap_or(0);
    Err(BridgeError::Api { status, message })
}
