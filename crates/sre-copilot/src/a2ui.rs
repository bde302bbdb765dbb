//! Declarative surfaces derived from a finished assistant answer.
//!
//! The answer is scanned for a markdown table and for an overall tone. A table becomes a
//! `table` component bound into the data model; without a table, a tone keyword becomes an
//! `alert`. Everything hangs off a `root` column container.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::protocol::{A2uiMessage, Component};

lazy_static! {
    static ref SEPARATOR_ROW: Regex = Regex::new(r"^[\s\-|:]+$").unwrap();
}

pub const ROOT_ID: &str = "root";
const ALERT_MESSAGE_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Success,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Success => "success",
            Severity::Info => "info",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Severity::Error => "Error Detected",
            Severity::Warning => "Warning",
            Severity::Success => "Success",
            Severity::Info => "Information",
        }
    }
}

const SEVERITY_KEYWORDS: [(Severity, &[&str]); 4] = [
    (Severity::Error, &["error", "failed", "critical", "down"]),
    (Severity::Warning, &["warning", "high", "elevated"]),
    (
        Severity::Success,
        &["success", "healthy", "resolved", "completed"],
    ),
    (Severity::Info, &["found", "info", "status"]),
];

fn short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &uuid[..8])
}

fn cells(line: &str) -> Vec<String> {
    line.split('|')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(String::from)
        .collect()
}

/// First markdown table of the text, if it has at least one data row.
///
/// Table lines are lines containing `|`; collection stops at the first blank line after the
/// table has started. A separator row such as `|---|:--:|` directly below the header is skipped.
pub fn extract_table(text: &str) -> Option<TableData> {
    let mut table_lines = Vec::new();
    for line in text.trim().lines() {
        if line.contains('|') {
            table_lines.push(line);
        } else if !table_lines.is_empty() && line.trim().is_empty() {
            break;
        }
    }

    if table_lines.len() < 2 {
        return None;
    }

    let headers = cells(table_lines[0]);
    let start = if SEPARATOR_ROW.is_match(table_lines[1]) {
        2
    } else {
        1
    };

    let rows: Vec<Vec<String>> = table_lines[start..]
        .iter()
        .map(|line| cells(line))
        .filter(|row| !row.is_empty())
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(TableData { headers, rows })
    }
}

/// Tone of the text, checked in order error, warning, success, info
pub fn detect_severity(text: &str) -> Option<Severity> {
    let lower = text.to_lowercase();
    SEVERITY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|word| lower.contains(word)))
        .map(|(severity, _)| *severity)
}

pub fn text(id: &str, text: &str, variant: &str) -> Component {
    Component::new(id, "text")
        .with_prop("text", json!(text))
        .with_prop("variant", json!(variant))
}

pub fn alert(severity: Severity, title: &str, message: &str) -> Component {
    Component::new(short_id("alert"), "alert")
        .with_prop("severity", json!(severity.as_str()))
        .with_prop("title", json!(title))
        .with_prop("message", json!(message))
}

pub fn container(id: &str, children: Vec<String>, direction: &str) -> Component {
    Component::new(id, "container")
        .with_prop("direction", json!(direction))
        .with_children(children)
}

/// A table component and the data model entry it is bound to
pub fn table(data: &TableData) -> (Component, Map<String, Value>) {
    let id = short_id("table");
    let component = Component::new(&id, "table").with_binding(format!("/tables/{}", id));

    let mut tables = Map::new();
    tables.insert(
        id,
        json!({
            "headers": data.headers,
            "rows": data.rows,
        }),
    );
    let mut model = Map::new();
    model.insert("tables".to_string(), Value::Object(tables));
    (component, model)
}

fn first_sentence(text: &str) -> String {
    let head = text.split('.').next().unwrap_or_default();
    format!("{}.", head)
        .chars()
        .take(ALERT_MESSAGE_LIMIT)
        .collect()
}

fn title_for(lower: &str) -> Option<Component> {
    if ["pod", "kubernetes", "k8s"].iter().any(|w| lower.contains(w)) {
        Some(text("title_pods", "Kubernetes Resources", "h6"))
    } else if ["incident", "pagerduty"].iter().any(|w| lower.contains(w)) {
        Some(text("title_incidents", "Incidents", "h6"))
    } else {
        None
    }
}

/// Surface messages for a finished answer, empty when nothing is worth rendering.
///
/// Produces a `surfaceUpdate` whose first component is the `root` container, followed by a
/// `dataModelUpdate` when a table was found.
pub fn generate(response: &str) -> Vec<A2uiMessage> {
    let mut components = Vec::new();
    let mut data = Map::new();
    let lower = response.to_lowercase();

    let table_data = extract_table(response);
    if let Some(table_data) = &table_data {
        let (component, model) = table(table_data);
        components.push(component);
        data.extend(model);

        if let Some(title) = title_for(&lower) {
            components.insert(0, title);
        }
    }

    if table_data.is_none() {
        if let Some(severity) = detect_severity(response) {
            components.push(alert(
                severity,
                severity.title(),
                &first_sentence(response),
            ));
        }
    }

    if components.is_empty() {
        return Vec::new();
    }

    let children = components.iter().map(|c| c.id.clone()).collect();
    let mut all = vec![container(ROOT_ID, children, "column")];
    all.extend(components);

    let mut messages = vec![A2uiMessage::SurfaceUpdate { components: all }];
    if !data.is_empty() {
        messages.push(A2uiMessage::DataModelUpdate { data });
    }
    messages
}
