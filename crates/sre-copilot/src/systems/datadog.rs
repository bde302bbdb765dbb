use anyhow::Result as AnyhowResult;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::{json_response, optional_str, optional_u64, required_str, string_list, tool_output, System};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const DEFAULT_SITE: &str = "datadoghq.com";

/// Span names probed when discovering which APM integration a service reports under
pub const SPAN_NAMES: &[&str] = &[
    "servlet.request",
    "http.request",
    "web.request",
    "rack.request",
    "flask.request",
    "django.request",
    "express.request",
    "aspnet_core.request",
    "grpc.server",
    "fastapi.request",
    "netty.request",
    "go.http.request",
];

const MAX_POINTS: usize = 30;

#[derive(Debug, Clone)]
pub struct DatadogConfig {
    pub api_key: String,
    pub app_key: String,
    pub site: String,
    /// Overrides `https://api.{site}`
    pub host: Option<String>,
}

impl DatadogConfig {
    pub fn new<S: Into<String>>(api_key: S, app_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            app_key: app_key.into(),
            site: DEFAULT_SITE.to_string(),
            host: None,
        }
    }

    /// Build a config from optional credentials; both keys must be present and non-empty
    pub fn from_credentials(
        api_key: Option<String>,
        app_key: Option<String>,
        site: Option<String>,
    ) -> AgentResult<Self> {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let app_key = app_key.filter(|k| !k.trim().is_empty());
        match (api_key, app_key) {
            (Some(api_key), Some(app_key)) => {
                let mut config = Self::new(api_key, app_key);
                if let Some(site) = site.filter(|s| !s.trim().is_empty()) {
                    config.site = site;
                }
                Ok(config)
            }
            _ => Err(AgentError::NotConfigured(
                "Datadog requires DD_API_KEY and DD_APP_KEY".to_string(),
            )),
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("https://api.{}", self.site),
        }
    }
}

pub struct DatadogSystem {
    tools: Vec<Tool>,
    client: Client,
    config: DatadogConfig,
}

impl DatadogSystem {
    pub fn new(config: DatadogConfig) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let get_monitors = Tool::new(
            "get_monitors",
            "List Datadog monitors with their current state. Use this to find out what is alerting.",
            json!({
                "type": "object",
                "properties": {
                    "state": {
                        "type": "string",
                        "description": "Only return monitors in this state, e.g. Alert, Warn, No Data, OK."
                    },
                    "tags": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Monitor tags to filter by, e.g. [\"team:payments\"]."
                    },
                    "limit": {"type": "integer", "default": 20}
                }
            }),
        );

        let query_metrics = Tool::new(
            "query_metrics",
            "Run a Datadog metrics query, e.g. avg:system.cpu.user{env:prod} by {host}. \
            Times accept 'now', 'now-<N><s|m|h|d|w>' or epoch seconds.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "description": "The metrics query."},
                    "from_time": {"type": "string", "default": "now-1h"},
                    "to_time": {"type": "string", "default": "now"}
                }
            }),
        );

        let get_k8s_pods = Tool::new(
            "get_k8s_pods",
            "List Kubernetes pods and their phase as reported to Datadog by the cluster agent.",
            json!({
                "type": "object",
                "properties": {
                    "env": {"type": "string", "description": "The env tag, e.g. prod."},
                    "namespace": {"type": "string", "description": "Kubernetes namespace."},
                    "limit": {"type": "integer", "default": 50}
                }
            }),
        );

        let get_apm_services = Tool::new(
            "get_apm_services",
            "List services reporting APM traces in the last hour, ordered by request count.",
            json!({
                "type": "object",
                "properties": {
                    "env": {"type": "string", "description": "The env tag, e.g. prod."},
                    "limit": {"type": "integer", "default": 20}
                }
            }),
        );

        let get_service_stats = Tool::new(
            "get_service_stats",
            "Get latency (avg, p95, p99), throughput and error rate for an APM service.",
            json!({
                "type": "object",
                "required": ["service"],
                "properties": {
                    "service": {"type": "string"},
                    "env": {"type": "string"},
                    "from_time": {"type": "string", "default": "now-1h"}
                }
            }),
        );

        let search_logs = Tool::new(
            "search_logs",
            "Search Datadog logs using the log search syntax, e.g. service:web status:error.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string"},
                    "from_time": {"type": "string", "default": "now-15m"},
                    "to_time": {"type": "string", "default": "now"},
                    "limit": {"type": "integer", "default": 50}
                }
            }),
        );

        Ok(Self {
            tools: vec![
                get_monitors,
                query_metrics,
                get_k8s_pods,
                get_apm_services,
                get_service_stats,
                search_logs,
            ],
            client,
            config,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.config.base_url(), path))
            .header("DD-API-KEY", &self.config.api_key)
            .header("DD-APPLICATION-KEY", &self.config.app_key)
            .header("Accept", "application/json")
    }

    /// Run a timeseries query and return its series
    async fn query(&self, query: &str, from: i64, to: i64) -> AgentResult<Vec<Value>> {
        tracing::debug!(query, from, to, "datadog metrics query");
        let response = self
            .request(Method::GET, "/api/v1/query")
            .query(&[
                ("from", from.to_string()),
                ("to", to.to_string()),
                ("query", query.to_string()),
            ])
            .send()
            .await?;
        let body = json_response(response).await?;

        if body.get("status").and_then(|s| s.as_str()) == Some("error") {
            let message = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("query failed");
            return Err(AgentError::ExecutionError(message.to_string()));
        }

        Ok(body
            .get("series")
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Like `query`, but a failure other than bad credentials counts as "no data"
    async fn probe(&self, query: &str, from: i64, to: i64) -> AgentResult<Vec<Value>> {
        match self.query(query, from, to).await {
            Ok(series) => Ok(series),
            Err(e @ AgentError::Upstream { status: 401, .. })
            | Err(e @ AgentError::Upstream { status: 403, .. }) => Err(e),
            Err(e) => {
                tracing::debug!(query, error = %e, "probe query failed");
                Ok(Vec::new())
            }
        }
    }

    async fn get_monitors(&self, args: &Value) -> AgentResult<Value> {
        let state = optional_str(args, "state");
        let tags = string_list(args, "tags");
        let limit = optional_u64(args, "limit")?.unwrap_or(20) as usize;

        let mut request = self.request(Method::GET, "/api/v1/monitor");
        if !tags.is_empty() {
            request = request.query(&[("monitor_tags", tags.join(","))]);
        }
        let body = json_response(request.send().await?).await?;
        let monitors = body.as_array().cloned().unwrap_or_default();

        let matching: Vec<&Value> = monitors
            .iter()
            .filter(|monitor| match state {
                Some(state) => monitor
                    .get("overall_state")
                    .and_then(|s| s.as_str())
                    .map(|s| s.eq_ignore_ascii_case(state))
                    .unwrap_or(false),
                None => true,
            })
            .collect();

        let mut status_summary: BTreeMap<String, u64> = BTreeMap::new();
        for monitor in &matching {
            let state = monitor
                .get("overall_state")
                .and_then(|s| s.as_str())
                .unwrap_or("Unknown");
            *status_summary.entry(state.to_string()).or_default() += 1;
        }

        let listed: Vec<Value> = matching
            .iter()
            .take(limit)
            .map(|monitor| {
                json!({
                    "id": monitor.get("id"),
                    "name": monitor.get("name"),
                    "status": monitor.get("overall_state"),
                    "type": monitor.get("type"),
                    "message": monitor.get("message"),
                    "tags": monitor.get("tags").cloned().unwrap_or_else(|| json!([])),
                })
            })
            .collect();

        Ok(json!({
            "monitors": listed,
            "total_count": matching.len(),
            "status_summary": status_summary,
        }))
    }

    async fn query_metrics(&self, args: &Value) -> AgentResult<Value> {
        let query = required_str(args, "query")?;
        let now = chrono::Utc::now().timestamp();
        let from = parse_time(optional_str(args, "from_time").unwrap_or("now-1h"), now)?;
        let to = parse_time(optional_str(args, "to_time").unwrap_or("now"), now)?;

        let series = self.query(query, from, to).await?;
        let series: Vec<Value> = series
            .iter()
            .map(|s| {
                let points = series_points(s);
                let skip = points.len().saturating_sub(MAX_POINTS);
                json!({
                    "metric": s.get("metric"),
                    "scope": s.get("scope"),
                    "points": points[skip..],
                    "latest": series_latest(s),
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "from": from,
            "to": to,
            "series": series,
        }))
    }

    async fn get_k8s_pods(&self, args: &Value) -> AgentResult<Value> {
        let env = optional_str(args, "env");
        let namespace = optional_str(args, "namespace");
        let limit = optional_u64(args, "limit")?.unwrap_or(50) as usize;

        let now = chrono::Utc::now().timestamp();
        let query = format!(
            "sum:kubernetes_state.pod.status_phase{{{}}} by {{pod_name,phase,kube_namespace}}",
            scope(&[("env", env), ("kube_namespace", namespace)])
        );
        let series = self.query(&query, now - 900, now).await?;

        let mut pods = Vec::new();
        let mut phase_summary: BTreeMap<String, u64> = BTreeMap::new();
        for s in &series {
            if series_latest(s).unwrap_or(0.0) <= 0.0 {
                continue;
            }
            let scope = s.get("scope").and_then(|v| v.as_str()).unwrap_or_default();
            let phase = scope_tag(scope, "phase").unwrap_or("unknown");
            *phase_summary.entry(phase.to_string()).or_default() += 1;
            pods.push(json!({
                "pod": scope_tag(scope, "pod_name").unwrap_or("unknown"),
                "phase": phase,
                "namespace": scope_tag(scope, "kube_namespace"),
            }));
        }

        let total_count = pods.len();
        pods.truncate(limit);

        Ok(json!({
            "pods": pods,
            "total_count": total_count,
            "phase_summary": phase_summary,
        }))
    }

    async fn get_apm_services(&self, args: &Value) -> AgentResult<Value> {
        let env = optional_str(args, "env");
        let limit = optional_u64(args, "limit")?.unwrap_or(20) as usize;

        let now = chrono::Utc::now().timestamp();
        let mut services: HashMap<String, (f64, Vec<String>)> = HashMap::new();
        for span in SPAN_NAMES {
            let query = format!(
                "sum:trace.{}.hits{{{}}} by {{service}}.as_count()",
                span,
                scope(&[("env", env)])
            );
            for s in self.probe(&query, now - 3600, now).await? {
                let hits = series_sum(&s);
                if hits <= 0.0 {
                    continue;
                }
                let scope = s.get("scope").and_then(|v| v.as_str()).unwrap_or_default();
                let Some(service) = scope_tag(scope, "service") else {
                    continue;
                };
                let entry = services
                    .entry(service.to_string())
                    .or_insert_with(|| (0.0, Vec::new()));
                entry.0 += hits;
                entry.1.push(span.to_string());
            }
        }

        let total_discovered = services.len();
        let mut ranked: Vec<(String, (f64, Vec<String>))> = services.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.total_cmp(&a.1 .0).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);

        let listed: Vec<Value> = ranked
            .into_iter()
            .map(|(service, (hits, span_types))| {
                json!({
                    "service": service,
                    "requests_last_hour": hits.round() as u64,
                    "span_types": span_types,
                })
            })
            .collect();

        Ok(json!({
            "services": listed,
            "count": listed.len(),
            "total_discovered": total_discovered,
        }))
    }

    /// First span name with any hits for the service in the window
    async fn discover_span_name(
        &self,
        service: &str,
        env: Option<&str>,
        from: i64,
        to: i64,
    ) -> AgentResult<Option<&'static str>> {
        let scope = scope(&[("service", Some(service)), ("env", env)]);
        for span in SPAN_NAMES {
            let query = format!("sum:trace.{}.hits{{{}}}.as_count()", span, scope);
            let series = self.probe(&query, from, to).await?;
            if series.iter().any(|s| series_sum(s) > 0.0) {
                return Ok(Some(span));
            }
        }
        Ok(None)
    }

    async fn get_service_stats(&self, args: &Value) -> AgentResult<Value> {
        let service = required_str(args, "service")?;
        let env = optional_str(args, "env");
        let now = chrono::Utc::now().timestamp();
        let from = parse_time(optional_str(args, "from_time").unwrap_or("now-1h"), now)?;

        let Some(span) = self.discover_span_name(service, env, from, now).await? else {
            return Ok(json!({
                "service": service,
                "env": env,
                "warning": format!(
                    "No APM data found for service '{}'{} in the selected window. \
                    The service may not exist, may not be instrumented or may report under a different env.",
                    service,
                    env.map(|e| format!(" in env '{}'", e)).unwrap_or_default()
                ),
                "tried_span_types": SPAN_NAMES,
            }));
        };

        let scope = scope(&[("service", Some(service)), ("env", env)]);
        let avg = self
            .query(&format!("avg:trace.{}.duration{{{}}}", span, scope), from, now)
            .await?;
        let p95 = self
            .query(&format!("p95:trace.{}{{{}}}", span, scope), from, now)
            .await?;
        let p99 = self
            .query(&format!("p99:trace.{}{{{}}}", span, scope), from, now)
            .await?;
        let hits = self
            .query(&format!("sum:trace.{}.hits{{{}}}.as_rate()", span, scope), from, now)
            .await?;
        let errors = self
            .query(&format!("sum:trace.{}.errors{{{}}}.as_rate()", span, scope), from, now)
            .await?;

        // durations are reported in seconds
        let to_ms = |series: &[Value]| series.first().and_then(series_mean).map(|v| round2(v * 1000.0));
        let requests_per_sec = hits.first().and_then(series_mean).unwrap_or(0.0);
        let errors_per_sec = errors.first().and_then(series_mean).unwrap_or(0.0);
        let error_rate_percent = if requests_per_sec > 0.0 {
            errors_per_sec / requests_per_sec * 100.0
        } else {
            0.0
        };

        Ok(json!({
            "service": service,
            "env": env,
            "span_type": span,
            "latency": {
                "avg_ms": to_ms(&avg),
                "p95_ms": to_ms(&p95),
                "p99_ms": to_ms(&p99),
            },
            "throughput": {
                "requests_per_sec": round2(requests_per_sec),
            },
            "errors": {
                "errors_per_sec": round2(errors_per_sec),
                "error_rate_percent": round2(error_rate_percent),
            },
        }))
    }

    async fn search_logs(&self, args: &Value) -> AgentResult<Value> {
        let query = required_str(args, "query")?;
        let now = chrono::Utc::now().timestamp();
        let from = parse_time(optional_str(args, "from_time").unwrap_or("now-15m"), now)?;
        let to = parse_time(optional_str(args, "to_time").unwrap_or("now"), now)?;
        let limit = optional_u64(args, "limit")?.unwrap_or(50).min(1000);

        let body = json!({
            "filter": {
                "query": query,
                "from": to_rfc3339(from)?,
                "to": to_rfc3339(to)?,
            },
            "page": {"limit": limit},
            "sort": "-timestamp",
        });
        let response = self
            .request(Method::POST, "/api/v2/logs/events/search")
            .json(&body)
            .send()
            .await?;
        let result = json_response(response).await?;

        let logs: Vec<Value> = result
            .get("data")
            .and_then(|d| d.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        let attributes = entry.get("attributes").cloned().unwrap_or(Value::Null);
                        json!({
                            "timestamp": attributes.get("timestamp"),
                            "service": attributes.get("service"),
                            "status": attributes.get("status"),
                            "message": attributes.get("message"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "logs": logs,
            "count": logs.len(),
        }))
    }
}

#[async_trait]
impl System for DatadogSystem {
    fn name(&self) -> &str {
        "datadog"
    }

    fn description(&self) -> &str {
        "Datadog monitors, metrics, APM traces, logs and Kubernetes state"
    }

    fn instructions(&self) -> &str {
        "Use the datadog tools to check monitor state, query metrics and inspect APM services. \
        Prefer get_monitors when asked what is alerting. For service health use get_apm_services \
        to find the service name, then get_service_stats."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn status(&self) -> AnyhowResult<HashMap<String, Value>> {
        Ok(HashMap::from([
            ("configured".to_string(), json!(true)),
            ("site".to_string(), json!(self.config.site)),
            ("tools".to_string(), json!(self.tools.len())),
        ]))
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let args = &tool_call.arguments;
        let result = match tool_call.name.as_str() {
            "get_monitors" => self.get_monitors(args).await,
            "query_metrics" => self.query_metrics(args).await,
            "get_k8s_pods" => self.get_k8s_pods(args).await,
            "get_apm_services" => self.get_apm_services(args).await,
            "get_service_stats" => self.get_service_stats(args).await,
            "search_logs" => self.search_logs(args).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name.clone())),
        };
        tool_output(&tool_call.name, result)
    }
}

fn invalid_time(value: &str) -> AgentError {
    AgentError::InvalidParameters(format!(
        "Invalid time '{}': expected 'now', 'now-<N><s|m|h|d|w>' or epoch seconds",
        value
    ))
}

/// Resolve `now`, `now-<N><unit>` or epoch seconds relative to `now`
pub(crate) fn parse_time(value: &str, now: i64) -> AgentResult<i64> {
    let value = value.trim();
    if value.is_empty() || value == "now" {
        return Ok(now);
    }

    if let Some(offset) = value.strip_prefix("now-") {
        let split = offset
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(offset.len());
        let (amount, unit) = offset.split_at(split);
        let amount: i64 = amount.parse().map_err(|_| invalid_time(value))?;
        let seconds = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 604_800,
            _ => return Err(invalid_time(value)),
        };
        return amount
            .checked_mul(seconds)
            .and_then(|offset| now.checked_sub(offset))
            .ok_or_else(|| invalid_time(value));
    }

    value.parse::<i64>().map_err(|_| invalid_time(value))
}

fn to_rfc3339(epoch: i64) -> AgentResult<String> {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|t| t.to_rfc3339())
        .ok_or_else(|| invalid_time(&epoch.to_string()))
}

/// Render tag filters as a query scope, `*` when no filter applies
fn scope(filters: &[(&str, Option<&str>)]) -> String {
    let tags: Vec<String> = filters
        .iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}:{}", key, v)))
        .collect();
    if tags.is_empty() {
        "*".to_string()
    } else {
        tags.join(",")
    }
}

/// Value of `key` in a series scope such as `pod_name:web-1,phase:running`
fn scope_tag<'a>(scope: &'a str, key: &str) -> Option<&'a str> {
    scope
        .split(',')
        .find_map(|part| part.trim().strip_prefix(key)?.strip_prefix(':'))
}

fn series_points(series: &Value) -> Vec<Value> {
    series
        .get("pointlist")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default()
}

fn series_values(series: &Value) -> Vec<f64> {
    series_points(series)
        .iter()
        .filter_map(|point| point.get(1).and_then(|v| v.as_f64()))
        .collect()
}

fn series_latest(series: &Value) -> Option<f64> {
    series_values(series).last().copied()
}

fn series_sum(series: &Value) -> f64 {
    series_values(series).iter().sum()
}

fn series_mean(series: &Value) -> Option<f64> {
    let values = series_values(series);
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn system_for(server: &MockServer) -> DatadogSystem {
        DatadogSystem::new(DatadogConfig::new("api", "app").with_host(server.uri())).unwrap()
    }

    async fn call(system: &DatadogSystem, name: &str, args: Value) -> Value {
        let contents = system.call(ToolCall::new(name, args)).await.unwrap();
        serde_json::from_str(contents[0].as_text().unwrap()).unwrap()
    }

    fn series(scope: &str, values: &[f64]) -> Value {
        let points: Vec<Value> = values
            .iter()
            .enumerate()
            .map(|(i, v)| json!([1_700_000_000_000u64 + i as u64 * 60_000, v]))
            .collect();
        json!({"metric": "m", "scope": scope, "pointlist": points})
    }

    async fn mount_query(server: &MockServer, query: &str, series: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", query))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "series": series})),
            )
            .mount(server)
            .await;
    }

    async fn mount_empty_queries(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "series": []})),
            )
            .with_priority(10)
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_time() {
        let now = 1_000_000;
        assert_eq!(parse_time("now", now).unwrap(), now);
        assert_eq!(parse_time("", now).unwrap(), now);
        assert_eq!(parse_time("now-15m", now).unwrap(), now - 900);
        assert_eq!(parse_time("now-2h", now).unwrap(), now - 7_200);
        assert_eq!(parse_time("now-1w", now).unwrap(), now - 604_800);
        assert_eq!(parse_time("1699999999", now).unwrap(), 1_699_999_999);
        assert!(parse_time("now-15", now).is_err());
        assert!(parse_time("yesterday", now).is_err());
        assert!(parse_time("now-99999999999999999d", now).is_err());
        assert!(parse_time("now-9223372036854775807s", i64::MIN + 1).is_err());
    }

    #[test]
    fn test_scope_helpers() {
        assert_eq!(scope(&[("env", None)]), "*");
        assert_eq!(
            scope(&[("service", Some("web")), ("env", Some("prod"))]),
            "service:web,env:prod"
        );
        let s = "pod_name:web-1,phase:running,kube_namespace:default";
        assert_eq!(scope_tag(s, "phase"), Some("running"));
        assert_eq!(scope_tag(s, "pod_name"), Some("web-1"));
        assert_eq!(scope_tag("service_name:x", "service"), None);
    }

    #[test]
    fn test_config_requires_both_keys() {
        assert!(matches!(
            DatadogConfig::from_credentials(Some("a".into()), None, None),
            Err(AgentError::NotConfigured(_))
        ));
        assert!(DatadogConfig::from_credentials(Some("a".into()), Some(" ".into()), None).is_err());
        let config = DatadogConfig::from_credentials(
            Some("a".into()),
            Some("b".into()),
            Some("datadoghq.eu".into()),
        )
        .unwrap();
        assert_eq!(config.base_url(), "https://api.datadoghq.eu");
    }

    #[tokio::test]
    async fn test_get_monitors_filters_and_summarises() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/monitor"))
            .and(header("DD-API-KEY", "api"))
            .and(header("DD-APPLICATION-KEY", "app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "name": "CPU high", "overall_state": "Alert", "type": "metric alert", "message": "cpu", "tags": ["team:core"]},
                {"id": 2, "name": "Disk", "overall_state": "OK", "type": "metric alert", "message": "disk", "tags": []},
                {"id": 3, "name": "Latency", "overall_state": "Alert", "type": "query alert", "message": "p99", "tags": []}
            ])))
            .mount(&server)
            .await;

        let system = system_for(&server);
        let all = call(&system, "get_monitors", json!({})).await;
        assert_eq!(all["total_count"], 3);
        assert_eq!(all["status_summary"], json!({"Alert": 2, "OK": 1}));

        let alerting = call(&system, "get_monitors", json!({"state": "alert", "limit": 1})).await;
        assert_eq!(alerting["total_count"], 2);
        assert_eq!(alerting["monitors"].as_array().unwrap().len(), 1);
        assert_eq!(alerting["monitors"][0]["name"], "CPU high");
        assert_eq!(alerting["monitors"][0]["status"], "Alert");
    }

    #[tokio::test]
    async fn test_query_metrics_reports_latest() {
        let server = MockServer::start().await;
        mount_query(
            &server,
            "avg:system.cpu.user{*}",
            vec![series("host:a", &[10.0, 20.0, 30.0])],
        )
        .await;

        let system = system_for(&server);
        let result = call(
            &system,
            "query_metrics",
            json!({"query": "avg:system.cpu.user{*}", "from_time": "now-5m"}),
        )
        .await;
        assert_eq!(result["series"][0]["latest"], 30.0);
        assert_eq!(result["series"][0]["scope"], "host:a");
        assert_eq!(result["series"][0]["points"].as_array().unwrap().len(), 3);
        assert_eq!(
            result["to"].as_i64().unwrap() - result["from"].as_i64().unwrap(),
            300
        );
    }

    #[tokio::test]
    async fn test_get_k8s_pods_uses_phase_series() {
        let server = MockServer::start().await;
        mount_query(
            &server,
            "sum:kubernetes_state.pod.status_phase{env:dev} by {pod_name,phase,kube_namespace}",
            vec![
                series("pod_name:web-1,phase:running,kube_namespace:web", &[1.0]),
                series("pod_name:web-2,phase:pending,kube_namespace:web", &[1.0]),
                series("pod_name:web-2,phase:running,kube_namespace:web", &[0.0]),
            ],
        )
        .await;

        let system = system_for(&server);
        let result = call(&system, "get_k8s_pods", json!({"env": "dev"})).await;
        assert_eq!(result["total_count"], 2);
        assert_eq!(result["phase_summary"], json!({"pending": 1, "running": 1}));
        assert_eq!(result["pods"][0]["pod"], "web-1");
        assert_eq!(result["pods"][0]["namespace"], "web");
    }

    #[tokio::test]
    async fn test_get_apm_services_ranks_by_hits() {
        let server = MockServer::start().await;
        mount_query(
            &server,
            "sum:trace.servlet.request.hits{env:prod} by {service}.as_count()",
            vec![
                series("service:billing", &[10.0, 5.0]),
                series("service:checkout", &[100.0]),
            ],
        )
        .await;
        mount_query(
            &server,
            "sum:trace.grpc.server.hits{env:prod} by {service}.as_count()",
            vec![series("service:billing", &[200.0])],
        )
        .await;
        mount_empty_queries(&server).await;

        let system = system_for(&server);
        let result = call(&system, "get_apm_services", json!({"env": "prod"})).await;
        assert_eq!(result["total_discovered"], 2);
        assert_eq!(result["services"][0]["service"], "billing");
        assert_eq!(result["services"][0]["requests_last_hour"], 215);
        assert_eq!(
            result["services"][0]["span_types"],
            json!(["servlet.request", "grpc.server"])
        );
        assert_eq!(result["services"][1]["service"], "checkout");
    }

    #[tokio::test]
    async fn test_get_service_stats() {
        let server = MockServer::start().await;
        let scope = "service:checkout,env:prod";
        mount_query(
            &server,
            &format!("sum:trace.http.request.hits{{{}}}.as_count()", scope),
            vec![series(scope, &[42.0])],
        )
        .await;
        mount_query(
            &server,
            &format!("avg:trace.http.request.duration{{{}}}", scope),
            vec![series(scope, &[0.1, 0.3])],
        )
        .await;
        mount_query(
            &server,
            &format!("p95:trace.http.request{{{}}}", scope),
            vec![series(scope, &[0.5])],
        )
        .await;
        mount_query(
            &server,
            &format!("p99:trace.http.request{{{}}}", scope),
            vec![series(scope, &[0.9])],
        )
        .await;
        mount_query(
            &server,
            &format!("sum:trace.http.request.hits{{{}}}.as_rate()", scope),
            vec![series(scope, &[4.0, 6.0])],
        )
        .await;
        mount_query(
            &server,
            &format!("sum:trace.http.request.errors{{{}}}.as_rate()", scope),
            vec![series(scope, &[0.5])],
        )
        .await;
        mount_empty_queries(&server).await;

        let system = system_for(&server);
        let result = call(
            &system,
            "get_service_stats",
            json!({"service": "checkout", "env": "prod"}),
        )
        .await;
        assert_eq!(result["span_type"], "http.request");
        assert_eq!(result["latency"]["avg_ms"], 200.0);
        assert_eq!(result["latency"]["p95_ms"], 500.0);
        assert_eq!(result["latency"]["p99_ms"], 900.0);
        assert_eq!(result["throughput"]["requests_per_sec"], 5.0);
        assert_eq!(result["errors"]["errors_per_sec"], 0.5);
        assert_eq!(result["errors"]["error_rate_percent"], 10.0);
    }

    #[tokio::test]
    async fn test_get_service_stats_without_data_warns() {
        let server = MockServer::start().await;
        mount_empty_queries(&server).await;

        let system = system_for(&server);
        let result = call(&system, "get_service_stats", json!({"service": "mono"})).await;
        assert!(result["warning"].as_str().unwrap().contains("mono"));
        assert_eq!(
            result["tried_span_types"].as_array().unwrap().len(),
            SPAN_NAMES.len()
        );
    }

    #[tokio::test]
    async fn test_search_logs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/logs/events/search"))
            .and(body_partial_json(json!({"filter": {"query": "status:error"}, "page": {"limit": 5}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "AAA",
                    "attributes": {
                        "timestamp": "2024-05-01T10:00:00Z",
                        "service": "web",
                        "status": "error",
                        "message": "connection refused"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let system = system_for(&server);
        let result = call(
            &system,
            "search_logs",
            json!({"query": "status:error", "limit": 5}),
        )
        .await;
        assert_eq!(result["count"], 1);
        assert_eq!(result["logs"][0]["message"], "connection refused");
    }

    #[tokio::test]
    async fn test_upstream_failure_becomes_error_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/monitor"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .mount(&server)
            .await;

        let system = system_for(&server);
        let result = call(&system, "get_monitors", json!({})).await;
        let error = result["error"].as_str().unwrap();
        assert!(error.contains("403"));
        assert!(error.contains("Forbidden"));
    }

    #[tokio::test]
    async fn test_missing_query_is_invalid_parameters() {
        let server = MockServer::start().await;
        let system = system_for(&server);
        let err = system
            .call(ToolCall::new("query_metrics", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
    }
}
