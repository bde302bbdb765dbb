use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::Usage;

use crate::errors::AgentError;
use crate::models::content::join_text;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Placeholder name for a tool request the model produced but we could not interpret
const INVALID_TOOL_NAME: &str = "invalid_tool_call";

const MODEL_TIMEOUT: Duration = Duration::from_secs(600);

pub fn model_client() -> Result<Client> {
    Ok(Client::builder().timeout(MODEL_TIMEOUT).build()?)
}

/// Body of a successful model call. Rate limits and outages become "Server error",
/// other failures carry the body the API answered with.
pub async fn model_response(response: Response) -> Result<Value> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response.json().await?);
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(anyhow!("Server error: {}", status));
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("Request failed: {} - {}", status, body))
}

/// Token counts from the `usage` object of a response
pub fn usage_from(response: &Value, input_key: &str, output_key: &str) -> Usage {
    let count = |key: &str| {
        response
            .pointer(&format!("/usage/{}", key))
            .and_then(Value::as_i64)
            .map(|v| v as i32)
    };
    let input = count(input_key);
    let output = count(output_key);
    let total = count("total_tokens").or(match (input, output) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });
    Usage::new(input, output, total)
}

/// Convert internal Message format to Anthropic's messages API specification
///   tool requests become `tool_use` blocks and tool responses `tool_result` blocks,
///   empty text blocks are dropped since the API rejects them
pub fn messages_to_anthropic_format(messages: &[Message]) -> Vec<Value> {
    let mut formatted = Vec::new();

    for message in messages {
        let mut blocks = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => blocks.push(json!({
                        "type": "tool_use",
                        "id": request.id,
                        "name": sanitize_function_name(&tool_call.name),
                        "input": tool_call.arguments,
                    })),
                    Err(_) => blocks.push(json!({
                        "type": "tool_use",
                        "id": request.id,
                        "name": INVALID_TOOL_NAME,
                        "input": {},
                    })),
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": response.id,
                        "content": join_text(contents),
                    })),
                    Err(e) => blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": response.id,
                        "content": format!("The tool call returned the following error:\n{}", e),
                        "is_error": true,
                    })),
                },
            }
        }

        if !blocks.is_empty() {
            formatted.push(json!({
                "role": message.role.as_str(),
                "content": blocks,
            }));
        }
    }

    formatted
}

/// Convert internal Tool format to Anthropic's tool specification
pub fn tools_to_anthropic_format(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.input_schema,
        }));
    }

    Ok(result)
}

/// Convert Anthropic's messages API response to internal Message format
pub fn anthropic_response_to_message(response: &Value) -> Result<Message> {
    let blocks = response
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid response format from Anthropic API"))?;

    let mut message = Message::assistant();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                let text = block.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                message = message.with_text(text);
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                let tool_call = if is_valid_function_name(name) {
                    Ok(ToolCall::new(name, input))
                } else {
                    Err(AgentError::ToolNotFound(format!(
                        "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                        name
                    )))
                };
                message = message.with_tool_request(id, tool_call);
            }
            other => {
                tracing::debug!(block_type = ?other, "ignoring unsupported anthropic content block");
            }
        }
    }

    Ok(message)
}

/// Convert internal Message format to OpenAI's chat completions message specification
pub fn messages_to_openai_format(messages: &[Message]) -> Vec<Value> {
    let mut formatted = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role.as_str()
        });

        let mut output = Vec::new();
        let mut tool_calls = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        converted["content"] = json!(text.text);
                    }
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        tool_calls.push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                    Err(e) => {
                        output.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => {
                        output.push(json!({
                            "role": "tool",
                            "content": join_text(contents),
                            "tool_call_id": response.id
                        }));
                    }
                    Err(e) => {
                        // A tool result error is shown as output so the model can interpret the error message
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        formatted.extend(output);
    }

    formatted
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_format(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: &Value) -> Result<Message> {
    let original = &response["choices"][0]["message"];
    if original.is_null() {
        return Err(anyhow!("Invalid response format from OpenAI API"));
    }

    let mut content = Vec::new();

    if let Some(text_str) = original.get("content").and_then(|t| t.as_str()) {
        content.push(MessageContent::text(text_str));
    }

    if let Some(tool_calls_array) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls_array {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                content.push(MessageContent::tool_request(id, Err(error)));
            } else {
                match serde_json::from_str::<Value>(&arguments) {
                    Ok(params) => {
                        content.push(MessageContent::tool_request(
                            id,
                            Ok(ToolCall::new(&function_name, params)),
                        ));
                    }
                    Err(e) => {
                        let error = AgentError::InvalidParameters(format!(
                            "Could not interpret tool use parameters for id {}: {}",
                            id, e
                        ));
                        content.push(MessageContent::tool_request(id, Err(error)));
                    }
                }
            }
        }
    }

    Ok(Message {
        role: Role::Assistant,
        created: chrono::Utc::now().timestamp(),
        content,
    })
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}
