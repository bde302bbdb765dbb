use anyhow::Result;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::load_prompt;
use crate::providers::base::Provider;
use crate::systems::System;

/// Upper bound on model calls within a single reply
pub const MAX_TURNS: usize = 25;

const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

/// Status of one tool set as reported by `Agent::status`
#[derive(Clone, Debug, Serialize)]
pub struct SystemStatus {
    pub name: String,
    pub tools: Vec<String>,
    pub status: HashMap<String, Value>,
}

/// Agent integrates a foundational LLM with the systems it needs to pilot
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Box<dyn Provider>,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            systems: Vec::new(),
            provider,
        }
    }

    /// Add a system to the agent
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    pub fn has_system(&self, name: &str) -> bool {
        self.systems.iter().any(|s| s.name() == name)
    }

    /// All tools from all systems, named `{system}__{tool}`
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for system in &self.systems {
            for tool in system.tools() {
                tools.push(Tool::new(
                    format!("{}__{}", system.name(), tool.name),
                    &tool.description,
                    tool.input_schema.clone(),
                ));
            }
        }
        tools
    }

    /// Current status of every system; a failing status call is reported in place
    pub async fn status(&self) -> Vec<SystemStatus> {
        let mut statuses = Vec::new();
        for system in &self.systems {
            let status = match system.status().await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(system = system.name(), error = %e, "system status failed");
                    HashMap::from([("error".to_string(), json!(e.to_string()))])
                }
            };
            statuses.push(SystemStatus {
                name: system.name().to_string(),
                tools: system.tools().iter().map(|t| t.name.clone()).collect(),
                status,
            });
        }
        statuses
    }

    /// Find the appropriate system for a tool call based on the prefixed name
    fn get_system_for_tool(&self, prefixed_name: &str) -> Option<&dyn System> {
        let parts: Vec<&str> = prefixed_name.split("__").collect();
        if parts.len() != 2 {
            return None;
        }
        let system_name = parts[0];
        self.systems
            .iter()
            .find(|sys| sys.name() == system_name)
            .map(|v| &**v)
    }

    /// Dispatch a single tool call to the appropriate system
    async fn dispatch_tool_call(
        &self,
        tool_call: AgentResult<ToolCall>,
    ) -> AgentResult<Vec<Content>> {
        let call = tool_call?;
        let system = self
            .get_system_for_tool(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        let tool_name = call
            .name
            .split("__")
            .nth(1)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        let system_tool_call = ToolCall::new(tool_name, call.arguments.clone());

        tracing::info!(tool = %call.name, arguments = %call.arguments, "dispatching tool call");
        let result = system.call(system_tool_call).await;
        match &result {
            Ok(_) => tracing::info!(tool = %call.name, "tool call finished"),
            Err(e) => tracing::warn!(tool = %call.name, error = %e, "tool call failed"),
        }
        result
    }

    pub fn get_system_prompt(&self) -> AgentResult<String> {
        let mut context = HashMap::new();
        let systems_info: Vec<SystemInfo> = self
            .systems
            .iter()
            .map(|system| {
                SystemInfo::new(system.name(), system.description(), system.instructions())
            })
            .collect();

        context.insert("systems", systems_info);
        load_prompt(SYSTEM_PROMPT, &context).map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Create a stream that yields each message as it's generated by the agent.
    /// This includes both the assistant's responses and any tool responses.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<Message>>> {
        let mut messages = messages.to_vec();
        let tools = self.tools();
        let system_prompt = self.get_system_prompt()?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut turns = 0;
            loop {
                if turns == MAX_TURNS {
                    Err::<(), _>(AgentError::Internal(format!(
                        "Stopped after {} model calls without a final answer",
                        MAX_TURNS
                    )))?;
                }
                turns += 1;

                let (response, usage) = self.provider.complete(
                    &system_prompt,
                    &messages,
                    &tools,
                ).await?;
                tracing::debug!(turn = turns, ?usage, "model responded");

                yield response.clone();

                // make sure the message above reaches the consumer before tools start running
                tokio::task::yield_now().await;

                let tool_requests: Vec<ToolRequest> = response
                    .tool_requests()
                    .into_iter()
                    .cloned()
                    .collect();

                if tool_requests.is_empty() {
                    break;
                }

                // Then dispatch each in parallel
                let futures: Vec<_> = tool_requests
                    .iter()
                    .map(|request| self.dispatch_tool_call(request.tool_call.clone()))
                    .collect();

                // Process all the futures in parallel but wait until all are finished
                let outputs = futures::future::join_all(futures).await;

                let mut message_tool_response = Message::user();
                for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                    message_tool_response = message_tool_response.with_tool_response(
                        request.id.clone(),
                        output,
                    );
                }

                yield message_tool_response.clone();

                messages.push(response);
                messages.push(message_tool_response);
            }
        }))
    }
}
