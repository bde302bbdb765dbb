use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::protocol::{A2uiMessage, Component, StreamEvent};

/// Id of the component a surface is rendered from
pub const ROOT_COMPONENT: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

/// One tool call as seen by the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolLogEntry {
    pub id: String,
    pub name: String,
    pub args: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub status: ToolStatus,
}

impl ToolLogEntry {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            args: None,
            result: None,
            error: None,
            status: ToolStatus::Running,
        }
    }
}

/// A component with its children resolved, ready to render
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceNode<'a> {
    pub component: &'a Component,
    pub children: Vec<SurfaceNode<'a>>,
}

/// Client side state of one conversation turn, built by replaying stream events in order.
///
/// The three views (assistant text, tool activity, declarative surface) are independent:
/// an event only ever touches one of them.
#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    pub thread_id: Option<String>,
    pub text: String,
    pub tools: Vec<ToolLogEntry>,
    pub components: HashMap<String, Component>,
    pub data: Map<String, Value>,
    /// Lines that could not be parsed as an event
    pub skipped: usize,
    pub finished: bool,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `data:` payload and apply it; malformed payloads are logged and skipped
    pub fn apply_payload(&mut self, payload: &str) -> Option<StreamEvent> {
        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => {
                self.apply(event.clone());
                Some(event)
            }
            Err(e) => {
                tracing::warn!(error = %e, payload, "skipping malformed stream event");
                self.skipped += 1;
                None
            }
        }
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::RunStart { thread_id, .. } => {
                self.thread_id = Some(thread_id);
            }
            StreamEvent::TextMessageContent { delta, .. } => {
                self.text.push_str(&delta);
            }
            StreamEvent::ToolCallStart {
                tool_call_id,
                tool_name,
                ..
            } => {
                self.tool_entry(&tool_call_id).name = tool_name;
            }
            StreamEvent::ToolCallArgs {
                tool_call_id, args, ..
            } => {
                self.tool_entry(&tool_call_id).args = Some(args);
            }
            StreamEvent::ToolCallEnd {
                tool_call_id,
                result,
                error,
                ..
            } => {
                let entry = self.tool_entry(&tool_call_id);
                if result.is_some() {
                    entry.result = result;
                }
                entry.status = if error.is_some() {
                    ToolStatus::Error
                } else {
                    ToolStatus::Success
                };
                entry.error = error;
            }
            StreamEvent::A2ui { a2ui, .. } => self.apply_a2ui(a2ui),
            StreamEvent::RunEnd { .. } => {
                self.finished = true;
            }
            StreamEvent::TextMessageStart { .. }
            | StreamEvent::TextMessageEnd { .. }
            | StreamEvent::Unknown => {}
        }
    }

    pub fn apply_a2ui(&mut self, message: A2uiMessage) {
        match message {
            A2uiMessage::SurfaceUpdate { components } => {
                for component in components {
                    self.components.insert(component.id.clone(), component);
                }
            }
            A2uiMessage::DataModelUpdate { data } => {
                self.data.extend(data);
            }
        }
    }

    fn tool_entry(&mut self, id: &str) -> &mut ToolLogEntry {
        let index = match self.tools.iter().position(|t| t.id == id) {
            Some(index) => index,
            None => {
                self.tools.push(ToolLogEntry::new(id));
                self.tools.len() - 1
            }
        };
        &mut self.tools[index]
    }

    pub fn tool(&self, id: &str) -> Option<&ToolLogEntry> {
        self.tools.iter().find(|t| t.id == id)
    }

    /// Look up a slash separated path such as `/tables/table_1` in the data model
    pub fn resolve_binding(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut current = self.data.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// The component tree hanging off `root`, or `None` if no root has been received.
    ///
    /// Children that have not arrived yet are left out, and a component never appears twice
    /// on one path.
    pub fn surface(&self) -> Option<SurfaceNode<'_>> {
        let root = self.components.get(ROOT_COMPONENT)?;
        let mut path = HashSet::new();
        Some(self.node(root, &mut path))
    }

    fn node<'a>(
        &'a self,
        component: &'a Component,
        path: &mut HashSet<&'a str>,
    ) -> SurfaceNode<'a> {
        path.insert(component.id.as_str());
        let present: Vec<&Component> = component
            .children
            .iter()
            .filter_map(|id| self.components.get(id))
            .filter(|child| !path.contains(child.id.as_str()))
            .collect();
        let children = present
            .into_iter()
            .map(|child| self.node(child, path))
            .collect();
        path.remove(component.id.as_str());
        SurfaceNode {
            component,
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn surface_update(components: Vec<Component>) -> StreamEvent {
        StreamEvent::A2ui {
            a2ui: A2uiMessage::SurfaceUpdate { components },
            thread_id: "t1".into(),
        }
    }

    #[test]
    fn test_text_deltas_accumulate() {
        let mut view = ConversationView::new();
        view.apply_payload(r#"{"type":"RUN_START","threadId":"t1","runId":"r1"}"#);
        view.apply_payload(
            r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m","delta":"Hel","threadId":"t1"}"#,
        );
        view.apply_payload(
            r#"{"type":"TEXT_MESSAGE_CONTENT","messageId":"m","delta":"lo","threadId":"t1"}"#,
        );
        view.apply_payload(r#"{"type":"RUN_END","threadId":"t1"}"#);

        assert_eq!(view.text, "Hello");
        assert_eq!(view.thread_id.as_deref(), Some("t1"));
        assert!(view.finished);
    }

    #[test]
    fn test_tool_end_with_error() {
        let mut view = ConversationView::new();
        view.apply(StreamEvent::ToolCallStart {
            tool_call_id: "c1".into(),
            tool_name: "kubernetes__list_pods".into(),
            thread_id: "t1".into(),
        });
        view.apply(StreamEvent::ToolCallEnd {
            tool_call_id: "c1".into(),
            result: None,
            error: Some("Tool not found".into()),
            thread_id: "t1".into(),
        });

        let entry = view.tool("c1").unwrap();
        assert_eq!(entry.status, ToolStatus::Error);
        assert_eq!(entry.name, "kubernetes__list_pods");
        assert_eq!(entry.error.as_deref(), Some("Tool not found"));
    }

    #[test]
    fn test_tool_end_without_start_creates_entry() {
        let mut view = ConversationView::new();
        view.apply(StreamEvent::ToolCallEnd {
            tool_call_id: "c9".into(),
            result: Some(json!({"ok": true})),
            error: None,
            thread_id: "t1".into(),
        });
        assert_eq!(view.tools.len(), 1);
        assert_eq!(view.tools[0].status, ToolStatus::Success);
    }

    #[test]
    fn test_resolve_binding() {
        let mut view = ConversationView::new();
        view.apply_a2ui(A2uiMessage::DataModelUpdate {
            data: json!({"tables": {"table_1": {"headers": ["a"], "rows": [["x"], ["y"]]}}})
                .as_object()
                .cloned()
                .unwrap(),
        });

        assert_eq!(
            view.resolve_binding("/tables/table_1/headers"),
            Some(&json!(["a"]))
        );
        assert_eq!(
            view.resolve_binding("/tables/table_1/rows/1/0"),
            Some(&json!("y"))
        );
        assert_eq!(view.resolve_binding("/tables/missing"), None);
        assert_eq!(view.resolve_binding("/"), None);
    }

    #[test]
    fn test_surface_skips_missing_and_cyclic_children() {
        let mut view = ConversationView::new();
        view.apply(surface_update(vec![
            Component::new("root", "container")
                .with_children(vec!["card".into(), "missing".into()]),
            Component::new("card", "card").with_children(vec!["root".into(), "body".into()]),
            Component::new("body", "text"),
        ]));

        let surface = view.surface().unwrap();
        assert_eq!(surface.component.id, "root");
        assert_eq!(surface.children.len(), 1);
        let card = &surface.children[0];
        assert_eq!(card.component.id, "card");
        assert_eq!(card.children.len(), 1);
        assert_eq!(card.children[0].component.id, "body");
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        let mut view = ConversationView::new();
        let event = view.apply_payload(r#"{"type":"STATE_DELTA","delta":[]}"#);
        assert_eq!(event, Some(StreamEvent::Unknown));
        assert_eq!(view.skipped, 0);
    }
}
