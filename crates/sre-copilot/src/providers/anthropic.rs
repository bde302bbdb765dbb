use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::base::{Provider, Usage};
use super::configs::AnthropicProviderConfig;
use super::utils::{
    anthropic_response_to_message, messages_to_anthropic_format, model_client, model_response,
    tools_to_anthropic_format, usage_from,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 4096;

/// Messages API backend, the default model for the copilot
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        Ok(Self {
            client: model_client()?,
            config,
        })
    }

    fn payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert(
            "messages".to_string(),
            json!(messages_to_anthropic_format(messages)),
        );
        payload.insert(
            "max_tokens".to_string(),
            json!(self.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        // the system prompt is a top level field here, not a message
        if !system.is_empty() {
            payload.insert("system".to_string(), json!(system));
        }
        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_anthropic_format(tools)?));
        }
        if let Some(temperature) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temperature));
        }
        Ok(Value::Object(payload))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.payload(system, messages, tools)?)
            .send()
            .await?;
        let body = model_response(response).await?;

        if let Some(error) = body.get("error") {
            return Err(anyhow!("Anthropic API error: {}", error));
        }

        let message = anthropic_response_to_message(&body)?;
        Ok((message, usage_from(&body, "input_tokens", "output_tokens")))
    }
}
