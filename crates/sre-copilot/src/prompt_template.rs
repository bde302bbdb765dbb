use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

/// Render a tera template from its source text
pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let context = Context::from_serialize(context_data)?;
    Tera::one_off(template, &context, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

    #[test]
    fn test_system_prompt_lists_integrations() {
        let context = json!({"systems": [
            {"name": "datadog", "description": "Monitors and metrics", "instructions": "Use query_metrics for graphs."},
            {"name": "pagerduty", "description": "Incidents", "instructions": "Use get_incidents first."}
        ]});

        let prompt = load_prompt(SYSTEM_PROMPT, &context).unwrap();
        assert!(prompt.starts_with("You are SRE Copilot"));
        assert!(prompt.contains("## datadog\nMonitors and metrics\n\nUse query_metrics for graphs."));
        assert!(prompt.contains("## pagerduty"));
        assert!(!prompt.contains("No integrations are configured"));
    }

    #[test]
    fn test_system_prompt_without_integrations() {
        let prompt = load_prompt(SYSTEM_PROMPT, &json!({"systems": []})).unwrap();
        assert!(prompt.contains("No integrations are configured"));
        assert!(!prompt.contains("# Integrations"));
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        assert!(load_prompt("On call for {{ service }}.", &json!({})).is_err());
    }
}
