use anyhow::Result as AnyhowResult;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use urlencoding::encode;

use super::{json_response, optional_str, optional_u64, required_str, string_list, tool_output, System};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const PAGERDUTY_HOST: &str = "https://api.pagerduty.com";

#[derive(Debug, Clone)]
pub struct PagerDutyConfig {
    pub api_key: String,
    pub host: String,
}

impl PagerDutyConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            host: PAGERDUTY_HOST.to_string(),
        }
    }

    pub fn from_credentials(api_key: Option<String>) -> AgentResult<Self> {
        api_key
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| {
                AgentError::NotConfigured("PagerDuty requires PAGERDUTY_API_KEY".to_string())
            })
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }
}

pub struct PagerDutySystem {
    tools: Vec<Tool>,
    client: Client,
    config: PagerDutyConfig,
}

impl PagerDutySystem {
    pub fn new(config: PagerDutyConfig) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let get_incidents = Tool::new(
            "get_incidents",
            "List PagerDuty incidents. Defaults to open incidents (triggered and acknowledged).",
            json!({
                "type": "object",
                "properties": {
                    "statuses": {
                        "type": "array",
                        "items": {"enum": ["triggered", "acknowledged", "resolved"]},
                        "default": ["triggered", "acknowledged"]
                    },
                    "limit": {"type": "integer", "default": 25}
                }
            }),
        );

        let get_incident = Tool::new(
            "get_incident",
            "Get a PagerDuty incident with its timeline of log entries.",
            json!({
                "type": "object",
                "required": ["incident_id"],
                "properties": {
                    "incident_id": {"type": "string"}
                }
            }),
        );

        let get_oncalls = Tool::new(
            "get_oncalls",
            "List who is currently on call, optionally for specific schedules or escalation policies.",
            json!({
                "type": "object",
                "properties": {
                    "schedule_ids": {"type": "array", "items": {"type": "string"}},
                    "escalation_policy_ids": {"type": "array", "items": {"type": "string"}}
                }
            }),
        );

        let get_services = Tool::new(
            "get_services",
            "List PagerDuty services and their current status.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Filter services by name."},
                    "limit": {"type": "integer", "default": 25}
                }
            }),
        );

        Ok(Self {
            tools: vec![get_incidents, get_incident, get_oncalls, get_services],
            client,
            config,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.config.host.trim_end_matches('/'), path))
            .header("Authorization", format!("Token token={}", self.config.api_key))
            .header("Accept", "application/vnd.pagerduty+json;version=2")
    }

    async fn get_incidents(&self, args: &Value) -> AgentResult<Value> {
        let mut statuses = string_list(args, "statuses");
        if statuses.is_empty() {
            statuses = vec!["triggered".to_string(), "acknowledged".to_string()];
        }
        let limit = optional_u64(args, "limit")?.unwrap_or(25).min(100);

        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("sort_by", "created_at:desc".to_string()),
        ];
        for status in &statuses {
            query.push(("statuses[]", status.clone()));
        }

        let body = json_response(self.get("/incidents").query(&query).send().await?).await?;
        let incidents: Vec<Value> = body
            .get("incidents")
            .and_then(|i| i.as_array())
            .map(|items| items.iter().map(summarize_incident).collect())
            .unwrap_or_default();

        let mut status_summary: BTreeMap<String, u64> = BTreeMap::new();
        for incident in &incidents {
            let status = incident["status"].as_str().unwrap_or("unknown");
            *status_summary.entry(status.to_string()).or_default() += 1;
        }

        Ok(json!({
            "incidents": incidents,
            "count": incidents.len(),
            "status_summary": status_summary,
        }))
    }

    async fn get_incident(&self, args: &Value) -> AgentResult<Value> {
        let id = required_str(args, "incident_id")?;

        let path = format!("/incidents/{}", encode(id));
        let body = json_response(self.get(&path).send().await?).await?;
        let incident = body.get("incident").cloned().unwrap_or(Value::Null);
        if incident.is_null() {
            return Err(AgentError::ExecutionError(format!(
                "Incident '{}' not found",
                id
            )));
        }

        let log = json_response(
            self.get(&format!("/incidents/{}/log_entries", encode(id)))
                .query(&[("is_overview", "true")])
                .send()
                .await?,
        )
        .await?;
        let log_entries: Vec<Value> = log
            .get("log_entries")
            .and_then(|l| l.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        json!({
                            "type": entry.get("type"),
                            "created_at": entry.get("created_at"),
                            "summary": entry.get("summary"),
                            "agent": entry.pointer("/agent/summary"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut details = summarize_incident(&incident);
        details["description"] = incident.get("description").cloned().unwrap_or(Value::Null);
        details["assignees"] = json!(incident
            .get("assignments")
            .and_then(|a| a.as_array())
            .map(|assignments| {
                assignments
                    .iter()
                    .filter_map(|a| a.pointer("/assignee/summary").cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default());
        details["escalation_policy"] = incident
            .pointer("/escalation_policy/summary")
            .cloned()
            .unwrap_or(Value::Null);
        details["log_entries"] = json!(log_entries);

        Ok(details)
    }

    async fn get_oncalls(&self, args: &Value) -> AgentResult<Value> {
        let mut query: Vec<(&str, String)> = Vec::new();
        for id in string_list(args, "schedule_ids") {
            query.push(("schedule_ids[]", id));
        }
        for id in string_list(args, "escalation_policy_ids") {
            query.push(("escalation_policy_ids[]", id));
        }

        let body = json_response(self.get("/oncalls").query(&query).send().await?).await?;
        let oncalls: Vec<Value> = body
            .get("oncalls")
            .and_then(|o| o.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|oncall| {
                        json!({
                            "user": oncall.pointer("/user/summary"),
                            "schedule": oncall.pointer("/schedule/summary"),
                            "escalation_policy": oncall.pointer("/escalation_policy/summary"),
                            "escalation_level": oncall.get("escalation_level"),
                            "start": oncall.get("start"),
                            "end": oncall.get("end"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "oncalls": oncalls,
            "count": oncalls.len(),
        }))
    }

    async fn get_services(&self, args: &Value) -> AgentResult<Value> {
        let limit = optional_u64(args, "limit")?.unwrap_or(25).min(100);
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(name) = optional_str(args, "query") {
            query.push(("query", name.to_string()));
        }

        let body = json_response(self.get("/services").query(&query).send().await?).await?;
        let services: Vec<Value> = body
            .get("services")
            .and_then(|s| s.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|service| {
                        json!({
                            "id": service.get("id"),
                            "name": service.get("name"),
                            "status": service.get("status"),
                            "description": service.get("description"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "services": services,
            "count": services.len(),
        }))
    }
}

fn summarize_incident(incident: &Value) -> Value {
    json!({
        "id": incident.get("id"),
        "number": incident.get("incident_number"),
        "title": incident.get("title"),
        "status": incident.get("status"),
        "urgency": incident.get("urgency"),
        "service": incident.pointer("/service/summary"),
        "created_at": incident.get("created_at"),
        "html_url": incident.get("html_url"),
    })
}

#[async_trait]
impl System for PagerDutySystem {
    fn name(&self) -> &str {
        "pagerduty"
    }

    fn description(&self) -> &str {
        "PagerDuty incidents, on-call schedules and services"
    }

    fn instructions(&self) -> &str {
        "Use the pagerduty tools to list open incidents, look at an incident's timeline \
        and find out who is on call."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn status(&self) -> AnyhowResult<HashMap<String, Value>> {
        Ok(HashMap::from([
            ("configured".to_string(), json!(true)),
            ("tools".to_string(), json!(self.tools.len())),
        ]))
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let args = &tool_call.arguments;
        let result = match tool_call.name.as_str() {
            "get_incidents" => self.get_incidents(args).await,
            "get_incident" => self.get_incident(args).await,
            "get_oncalls" => self.get_oncalls(args).await,
            "get_services" => self.get_services(args).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name.clone())),
        };
        tool_output(&tool_call.name, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn system_for(server: &MockServer) -> PagerDutySystem {
        PagerDutySystem::new(PagerDutyConfig::new("pd_key").with_host(server.uri())).unwrap()
    }

    async fn call(system: &PagerDutySystem, name: &str, args: Value) -> Value {
        let contents = system.call(ToolCall::new(name, args)).await.unwrap();
        serde_json::from_str(contents[0].as_text().unwrap()).unwrap()
    }

    fn incident(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "incident_number": 42,
            "title": "Checkout latency",
            "status": status,
            "urgency": "high",
            "service": {"id": "S1", "summary": "checkout"},
            "created_at": "2024-05-01T10:00:00Z",
            "html_url": format!("https://acme.pagerduty.com/incidents/{}", id),
            "assignments": [{"assignee": {"summary": "Sam Rivera"}}],
            "escalation_policy": {"summary": "Payments"}
        })
    }

    #[test]
    fn test_config_requires_key() {
        assert!(matches!(
            PagerDutyConfig::from_credentials(Some(String::new())),
            Err(AgentError::NotConfigured(_))
        ));
        assert!(PagerDutyConfig::from_credentials(Some("k".into())).is_ok());
    }

    #[tokio::test]
    async fn test_get_incidents_defaults_to_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/incidents"))
            .and(header("Authorization", "Token token=pd_key"))
            .and(header("Accept", "application/vnd.pagerduty+json;version=2"))
            .and(query_param("statuses[]", "triggered"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "incidents": [incident("P1", "triggered"), incident("P2", "acknowledged")]
            })))
            .mount(&server)
            .await;

        let system = system_for(&server);
        let result = call(&system, "get_incidents", json!({})).await;
        assert_eq!(result["count"], 2);
        assert_eq!(result["status_summary"], json!({"acknowledged": 1, "triggered": 1}));
        assert_eq!(result["incidents"][0]["service"], "checkout");
        assert_eq!(result["incidents"][0]["number"], 42);
    }

    #[tokio::test]
    async fn test_get_incident_includes_log_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/incidents/P1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"incident": incident("P1", "triggered")})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/incidents/P1/log_entries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "log_entries": [{
                    "type": "trigger_log_entry",
                    "created_at": "2024-05-01T10:00:00Z",
                    "summary": "Triggered through the API",
                    "agent": {"summary": "Datadog"}
                }]
            })))
            .mount(&server)
            .await;

        let system = system_for(&server);
        let result = call(&system, "get_incident", json!({"incident_id": "P1"})).await;
        assert_eq!(result["id"], "P1");
        assert_eq!(result["assignees"], json!(["Sam Rivera"]));
        assert_eq!(result["escalation_policy"], "Payments");
        assert_eq!(result["log_entries"][0]["agent"], "Datadog");
    }

    #[tokio::test]
    async fn test_incident_id_is_one_path_segment() {
        let server = MockServer::start().await;
        let system = system_for(&server);
        let result = call(
            &system,
            "get_incident",
            json!({"incident_id": "P1/log_entries?x="}),
        )
        .await;
        assert!(result.get("error").is_some());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.path(), "/incidents/P1%2Flog_entries%3Fx%3D");
        assert!(requests[0].url.query().is_none());
    }

    #[tokio::test]
    async fn test_get_oncalls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oncalls"))
            .and(query_param("schedule_ids[]", "SCHED1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "oncalls": [{
                    "user": {"summary": "Sam Rivera"},
                    "schedule": {"summary": "Primary"},
                    "escalation_policy": {"summary": "Payments"},
                    "escalation_level": 1,
                    "start": "2024-05-01T00:00:00Z",
                    "end": "2024-05-08T00:00:00Z"
                }]
            })))
            .mount(&server)
            .await;

        let system = system_for(&server);
        let result = call(&system, "get_oncalls", json!({"schedule_ids": ["SCHED1"]})).await;
        assert_eq!(result["count"], 1);
        assert_eq!(result["oncalls"][0]["user"], "Sam Rivera");
        assert_eq!(result["oncalls"][0]["escalation_level"], 1);
    }

    #[tokio::test]
    async fn test_unauthorized_is_reported_to_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let system = system_for(&server);
        let result = call(&system, "get_services", json!({})).await;
        assert!(result["error"].as_str().unwrap().contains("401"));
    }
}
