use console::style;
use serde_json::Value;
use sre_copilot::client::{ConversationView, SurfaceNode, ToolLogEntry, ToolStatus};

const INDENT: &str = "  ";

/// Terminal rendering of the declarative surface, `None` when there is no root
pub fn surface(view: &ConversationView) -> Option<String> {
    let root = view.surface()?;
    let mut out = String::new();
    render_node(&root, view, 0, &mut out);
    Some(out)
}

fn render_node(node: &SurfaceNode<'_>, view: &ConversationView, depth: usize, out: &mut String) {
    let component = node.component;
    let pad = INDENT.repeat(depth);
    let mut child_depth = depth;

    match component.kind.as_str() {
        "container" => {}
        "text" => {
            let text = component.prop_str("text").unwrap_or_default();
            let line = match component.prop_str("variant") {
                Some(variant) if variant.starts_with('h') => style(text).bold().to_string(),
                Some("caption") => style(text).dim().to_string(),
                _ => text.to_string(),
            };
            out.push_str(&format!("{}{}\n", pad, line));
        }
        "alert" => {
            let severity = component.prop_str("severity").unwrap_or("info");
            let title = component.prop_str("title").unwrap_or_default();
            let message = component.prop_str("message").unwrap_or_default();
            let badge = match severity {
                "error" => style(format!("✗ {}", title)).red().bold(),
                "warning" => style(format!("! {}", title)).yellow().bold(),
                "success" => style(format!("✓ {}", title)).green().bold(),
                _ => style(format!("i {}", title)).cyan().bold(),
            };
            out.push_str(&format!("{}{}\n{}{}\n", pad, badge, pad, message));
        }
        "table" => {
            let data = component
                .binding
                .as_deref()
                .and_then(|path| view.resolve_binding(path));
            match data {
                Some(data) => table(data, &pad, out),
                None => out.push_str(&format!("{}{}\n", pad, style("(no table data)").dim())),
            }
        }
        "card" => {
            if let Some(title) = component.prop_str("title") {
                out.push_str(&format!("{}{}\n", pad, style(title).bold().underlined()));
            }
            child_depth += 1;
        }
        other => {
            out.push_str(&format!("{}{}\n", pad, style(format!("[{}]", other)).dim()));
        }
    }

    for child in &node.children {
        render_node(child, view, child_depth, out);
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Column aligned table from `{headers, rows}`
fn table(data: &Value, pad: &str, out: &mut String) {
    let headers: Vec<String> = data["headers"]
        .as_array()
        .map(|h| h.iter().map(cell_text).collect())
        .unwrap_or_default();
    let rows: Vec<Vec<String>> = data["rows"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_text).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();

    let columns = rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(headers.len()))
        .max()
        .unwrap_or(0);
    let mut widths = vec![0; columns];
    for row in std::iter::once(&headers).chain(rows.iter()) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        widths
            .iter()
            .enumerate()
            .map(|(i, width)| {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                format!("{:<width$}", cell, width = *width)
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    if !headers.is_empty() {
        out.push_str(&format!("{}{}\n", pad, style(line(&headers)).bold()));
        let rule: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
        out.push_str(&format!("{}{}\n", pad, style(rule.join("  ")).dim()));
    }
    for row in &rows {
        out.push_str(&format!("{}{}\n", pad, line(row)));
    }
}

/// One line of the tool activity log
pub fn tool_line(entry: &ToolLogEntry) -> String {
    let name = if entry.name.is_empty() {
        entry.id.as_str()
    } else {
        entry.name.as_str()
    };
    match entry.status {
        ToolStatus::Running => format!("{} {}", style("…").dim(), style(name).dim()),
        ToolStatus::Success => format!("{} {}", style("✓").green(), name),
        ToolStatus::Error => format!(
            "{} {} {}",
            style("✗").red(),
            name,
            style(entry.error.as_deref().unwrap_or_default()).red()
        ),
    }
}

/// Human readable `GET /status` report
pub fn status(status: &Value) -> String {
    let flag = |key: &str| status[key].as_bool().unwrap_or(false);
    let mark = |ok: bool| {
        if ok {
            style("✓").green().to_string()
        } else {
            style("✗").red().to_string()
        }
    };

    let mut out = String::new();
    let llm = flag("llm_configured");
    out.push_str(&format!(
        "{} LLM: {}\n",
        mark(llm),
        if llm { "Configured" } else { "Not configured" }
    ));
    if let (Some(provider), Some(model)) = (
        status["llm_provider"].as_str(),
        status["llm_model"].as_str(),
    ) {
        out.push_str(&format!("   Model: {} ({})\n", model, provider));
    }

    for (key, label) in [
        ("datadog_configured", "Datadog"),
        ("pagerduty_configured", "PagerDuty"),
        ("kubernetes_configured", "Kubernetes"),
    ] {
        let ok = flag(key);
        out.push_str(&format!(
            "{} {}: {}\n",
            mark(ok),
            label,
            if ok { "Configured" } else { "Not configured (optional)" }
        ));
    }

    out.push_str(&format!(
        "Total tools available: {}\n",
        status["available_tools"].as_u64().unwrap_or(0)
    ));
    out
}
