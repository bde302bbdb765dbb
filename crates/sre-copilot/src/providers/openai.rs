use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::base::{Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    messages_to_openai_format, model_client, model_response, openai_response_to_message,
    tools_to_openai_format, usage_from,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Chat completions backend; the system prompt travels as the first message
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        Ok(Self {
            client: model_client()?,
            config,
        })
    }

    fn payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let mut conversation = vec![json!({"role": "system", "content": system})];
        conversation.extend(messages_to_openai_format(messages));

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("messages".to_string(), json!(conversation));
        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_openai_format(tools)?));
        }
        if let Some(temperature) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = self.config.max_tokens {
            payload.insert("max_tokens".to_string(), json!(max_tokens));
        }
        Ok(Value::Object(payload))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.payload(system, messages, tools)?)
            .send()
            .await?;
        let body = model_response(response).await?;

        if let Some(error) = body.get("error") {
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        let message = openai_response_to_message(&body)?;
        Ok((message, usage_from(&body, "prompt_tokens", "completion_tokens")))
    }
}
