use anyhow::Result as AnyhowResult;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub mod datadog;
pub mod kubeconfig;
pub mod kubernetes;
pub mod pagerduty;

pub use datadog::{DatadogConfig, DatadogSystem};
pub use kubernetes::KubernetesSystem;
pub use pagerduty::{PagerDutyConfig, PagerDutySystem};

/// Core trait that defines a tool set the agent can operate
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions
    fn instructions(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Get current system status
    async fn status(&self) -> AnyhowResult<HashMap<String, Value>>;

    /// Call a tool with the given parameters
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}

/// Wrap the outcome of a tool into the content handed back to the model.
///
/// Failures talking to the backing service are reported as an `{"error": ..}` mapping so
/// the model can read and explain them; only a bad tool name or bad arguments fail the call.
pub(crate) fn tool_output(tool: &str, result: AgentResult<Value>) -> AgentResult<Vec<Content>> {
    match result {
        Ok(value) => Ok(vec![Content::json(&value)]),
        Err(e @ AgentError::ToolNotFound(_)) | Err(e @ AgentError::InvalidParameters(_)) => Err(e),
        Err(e) => {
            tracing::warn!(tool, error = %e, "tool reported an error");
            Ok(vec![Content::json(&json!({ "error": error_message(&e) }))])
        }
    }
}

fn error_message(error: &AgentError) -> String {
    match error {
        AgentError::ExecutionError(message) | AgentError::NotConfigured(message) => {
            message.clone()
        }
        other => other.to_string(),
    }
}

/// Read a successful JSON body, or turn a non-2xx response into `AgentError::Upstream`
pub(crate) async fn json_response(response: reqwest::Response) -> AgentResult<Value> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Invalid JSON in response: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(500).collect();
    Err(AgentError::Upstream {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> AgentResult<&'a str> {
    optional_str(args, key).ok_or_else(|| {
        AgentError::InvalidParameters(format!("The '{}' parameter is required", key))
    })
}

/// A string argument; empty strings count as absent
pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// An integer argument, also accepted as a numeric string
pub(crate) fn optional_u64(args: &Value, key: &str) -> AgentResult<Option<u64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            AgentError::InvalidParameters(format!("'{}' must be a non-negative integer", key))
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|_| {
            AgentError::InvalidParameters(format!("'{}' must be a non-negative integer", key))
        }),
        Some(_) => Err(AgentError::InvalidParameters(format!(
            "'{}' must be a non-negative integer",
            key
        ))),
    }
}

pub(crate) fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    match args.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A list argument given either as a JSON array or a comma separated string
pub(crate) fn string_list(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
