//! Wire format between the relay and its clients.
//!
//! The relay answers `POST /stream` with server-sent events, one JSON object per
//! `data:` line, tagged by `type`. Declarative UI travels inside `A2UI_MESSAGE` events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One event of the relay's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "RUN_START", rename_all = "camelCase")]
    RunStart { thread_id: String, run_id: String },

    #[serde(rename = "TEXT_MESSAGE_START", rename_all = "camelCase")]
    TextMessageStart {
        message_id: String,
        thread_id: String,
    },

    #[serde(rename = "TEXT_MESSAGE_CONTENT", rename_all = "camelCase")]
    TextMessageContent {
        message_id: String,
        delta: String,
        thread_id: String,
    },

    #[serde(rename = "TEXT_MESSAGE_END", rename_all = "camelCase")]
    TextMessageEnd {
        message_id: String,
        thread_id: String,
    },

    #[serde(rename = "TOOL_CALL_START", rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        thread_id: String,
    },

    #[serde(rename = "TOOL_CALL_ARGS", rename_all = "camelCase")]
    ToolCallArgs {
        tool_call_id: String,
        args: Value,
        thread_id: String,
    },

    #[serde(rename = "TOOL_CALL_END", rename_all = "camelCase")]
    ToolCallEnd {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        thread_id: String,
    },

    #[serde(rename = "A2UI_MESSAGE", rename_all = "camelCase")]
    A2ui { a2ui: A2uiMessage, thread_id: String },

    #[serde(rename = "RUN_END", rename_all = "camelCase")]
    RunEnd { thread_id: String },

    /// Any event type this client does not know about
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::RunStart { .. } => "RUN_START",
            StreamEvent::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            StreamEvent::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            StreamEvent::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            StreamEvent::ToolCallStart { .. } => "TOOL_CALL_START",
            StreamEvent::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            StreamEvent::ToolCallEnd { .. } => "TOOL_CALL_END",
            StreamEvent::A2ui { .. } => "A2UI_MESSAGE",
            StreamEvent::RunEnd { .. } => "RUN_END",
            StreamEvent::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum A2uiMessage {
    /// Components to upsert into the surface, keyed by id
    SurfaceUpdate { components: Vec<Component> },
    /// Top-level keys to merge into the shared data model
    DataModelUpdate { data: Map<String, Value> },
}

/// A node of the declarative component tree; children are referenced by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<String>,
    /// Slash separated path into the data model, e.g. `/tables/table_1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,
}

impl Component {
    pub fn new<I: Into<String>, K: Into<String>>(id: I, kind: K) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            props: Map::new(),
            children: Vec::new(),
            binding: None,
        }
    }

    pub fn with_prop<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.children = children;
        self
    }

    pub fn with_binding<S: Into<String>>(mut self, binding: S) -> Self {
        self.binding = Some(binding.into());
        self
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(|v| v.as_str())
    }
}

/// A message of the client's transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST /chat` and `POST /stream`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
}

impl ChatRequest {
    /// Content of the most recent user message, `None` if it is missing or empty
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .filter(|content| !content.is_empty())
    }

    pub fn wants_extension(&self, name: &str) -> bool {
        self.extensions
            .as_ref()
            .map(|extensions| extensions.iter().any(|e| e == name))
            .unwrap_or(false)
    }
}

/// Body returned by `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub thread_id: String,
}

/// Frame an event as one server-sent event
pub fn format_sse(event: &StreamEvent) -> String {
    let payload = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize stream event");
        String::from("{}")
    });
    format!("data: {}\n\n", payload)
}
