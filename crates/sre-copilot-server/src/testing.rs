use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sre_copilot::agent::Agent;
use sre_copilot::errors::{AgentError, AgentResult};
use sre_copilot::memory::DEFAULT_MAX_THREADS;
use sre_copilot::models::content::Content;
use sre_copilot::models::message::Message;
use sre_copilot::models::tool::{Tool, ToolCall};
use sre_copilot::providers::base::{Provider, Usage};
use sre_copilot::systems::System;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::state::{AppState, ModelInfo};

/// Replays scripted replies and records what the agent sent
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Message, String>>>,
    seen: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<Message, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.seen.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(message)) => Ok((message, Usage::default())),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok((Message::assistant(), Usage::default())),
        }
    }
}

/// A tool set answering `lookup` with a fixed mapping; `wait` never finishes
pub struct FakeSystem {
    tools: Vec<Tool>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self {
            tools: vec![
                Tool::new(
                    "lookup",
                    "Look up pods",
                    json!({"type": "object", "properties": {"namespace": {"type": "string"}}}),
                ),
                Tool::new(
                    "wait",
                    "Wait for a rollout",
                    json!({"type": "object", "properties": {}}),
                ),
            ],
        }
    }
}

#[async_trait]
impl System for FakeSystem {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn description(&self) -> &str {
        "Fake cluster"
    }

    fn instructions(&self) -> &str {
        "Use lookup"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn status(&self) -> Result<HashMap<String, Value>> {
        Ok(HashMap::from([("configured".to_string(), json!(true))]))
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match tool_call.name.as_str() {
            "lookup" => Ok(vec![Content::json(&json!({
                "namespace": tool_call.arguments["namespace"],
                "pods": ["api-1", "api-2"],
            }))]),
            "wait" => std::future::pending().await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

pub fn app_state(provider: ScriptedProvider, with_system: bool) -> AppState {
    let mut agent = Agent::new(Box::new(provider));
    if with_system {
        agent.add_system(Box::new(FakeSystem::new()));
    }
    AppState::new(
        agent,
        ModelInfo {
            provider: "anthropic".to_string(),
            model: "test-model".to_string(),
        },
        DEFAULT_MAX_THREADS,
    )
}
