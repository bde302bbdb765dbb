use anyhow::Result as AnyhowResult;
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, RequestBuilder};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use urlencoding::encode;

use super::kubeconfig::{Kubeconfig, ResolvedContext};
use super::{optional_bool, optional_str, optional_u64, required_str, System};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub const DEFAULT_TAIL_LINES: u64 = 100;
pub const MAX_TAIL_LINES: u64 = 10_000;

/// Failures reported back to the model as `{"error": ..}` tool results
#[derive(Debug, Error)]
pub enum KubeError {
    #[error("Kubeconfig not found at {0}. Please ensure kubectl is configured with a valid kubeconfig file.")]
    KubeconfigNotFound(String),

    #[error("Failed to parse kubeconfig ({0}). Please check that your kubeconfig file is valid.")]
    InvalidKubeconfig(String),

    #[error("Failed to load context: {0}")]
    Context(String),

    #[error("Authentication failed for context '{0}'. Please check your kubeconfig credentials.")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Failed to connect to cluster '{0}'. Please check your network connection and cluster availability.")]
    Connection(String),

    #[error("Pod '{pod}' has multiple containers. Please specify one of: {}", .containers.join(", "))]
    ContainerRequired { pod: String, containers: Vec<String> },

    #[error("Container '{container}' not found in pod '{pod}'. Available containers: {}", .containers.join(", "))]
    UnknownContainer {
        container: String,
        pod: String,
        containers: Vec<String>,
    },

    #[error("{0}")]
    Api(String),
}

impl KubeError {
    pub fn to_value(&self) -> Value {
        match self {
            KubeError::ContainerRequired { containers, .. }
            | KubeError::UnknownContainer { containers, .. } => {
                json!({"error": self.to_string(), "containers": containers})
            }
            _ => json!({"error": self.to_string()}),
        }
    }
}

/// A failed API call before it is given an operation specific message
#[derive(Debug)]
enum ApiFailure {
    Status(u16, String),
    Connect(String),
    Other(String),
}

impl From<reqwest::Error> for ApiFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ApiFailure::Connect(err.to_string())
        } else {
            ApiFailure::Other(err.to_string())
        }
    }
}

/// Operation specific wording for the common failure statuses
struct Wording {
    forbidden: String,
    not_found: String,
    failed: String,
}

impl ApiFailure {
    fn into_kube_error(self, context: &str, wording: Wording) -> KubeError {
        match self {
            ApiFailure::Status(401, _) => KubeError::Unauthorized(context.to_string()),
            ApiFailure::Status(403, _) => KubeError::Forbidden(wording.forbidden),
            ApiFailure::Status(404, _) => KubeError::NotFound(wording.not_found),
            ApiFailure::Connect(_) => KubeError::Connection(context.to_string()),
            ApiFailure::Status(status, message) => {
                KubeError::Api(format!("{}: {} {}", wording.failed, status, message))
            }
            ApiFailure::Other(message) => KubeError::Api(format!("{}: {}", wording.failed, message)),
        }
    }
}

struct KubeClient {
    http: Client,
    server: String,
    token: Option<String>,
}

impl KubeClient {
    fn new(resolved: &ResolvedContext) -> Result<Self, KubeError> {
        let invalid = |e: reqwest::Error| KubeError::InvalidKubeconfig(e.to_string());

        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30));
        if resolved.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca) = &resolved.ca_pem {
            builder = builder.add_root_certificate(Certificate::from_pem(ca).map_err(invalid)?);
        }
        if let Some(identity) = &resolved.identity_pem {
            builder = builder.identity(Identity::from_pem(identity).map_err(invalid)?);
        }

        Ok(Self {
            http: builder.build().map_err(invalid)?,
            server: resolved.server.trim_end_matches('/').to_string(),
            token: resolved.token.clone(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.http.get(format!("{}{}", self.server, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiFailure> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        // the API server answers with a Status object carrying a readable message
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);
        Err(ApiFailure::Status(status.as_u16(), message))
    }

    async fn get_json(&self, path: &str) -> Result<Value, ApiFailure> {
        let response = self.fetch(self.get(path)).await?;
        Ok(response.json::<Value>().await?)
    }
}

/// Pod collection or single pod path; names are encoded as one segment each
fn pods_path(namespace: &str, pod: Option<&str>) -> String {
    let base = format!("/api/v1/namespaces/{}/pods", encode(namespace));
    match pod {
        Some(pod) => format!("{}/{}", base, encode(pod)),
        None => base,
    }
}

pub struct KubernetesSystem {
    tools: Vec<Tool>,
    kubeconfig: Kubeconfig,
    clients: Mutex<HashMap<String, Arc<KubeClient>>>,
}

impl KubernetesSystem {
    /// Load the kubeconfig at `path`; a missing file leaves the tool set unconfigured
    pub fn new(path: impl Into<PathBuf>) -> AgentResult<Self> {
        let path = path.into();
        let kubeconfig = Kubeconfig::load(&path).map_err(|e| match e {
            KubeError::KubeconfigNotFound(_) => AgentError::NotConfigured(e.to_string()),
            other => AgentError::Internal(other.to_string()),
        })?;
        Ok(Self::from_kubeconfig(kubeconfig))
    }

    pub fn from_kubeconfig(kubeconfig: Kubeconfig) -> Self {
        let context_property = json!({
            "type": "string",
            "description": "Kubernetes context name from get_contexts. Defaults to the current context."
        });

        let get_contexts = Tool::new(
            "get_contexts",
            "List the cluster contexts available in the kubeconfig.",
            json!({"type": "object", "properties": {}}),
        );

        let get_namespaces = Tool::new(
            "get_namespaces",
            "List namespaces in a cluster.",
            json!({
                "type": "object",
                "properties": {"context": context_property}
            }),
        );

        let list_pods = Tool::new(
            "list_pods",
            "List pods in a namespace with readiness, status, restarts, age and node.",
            json!({
                "type": "object",
                "required": ["namespace"],
                "properties": {
                    "context": context_property,
                    "namespace": {"type": "string"}
                }
            }),
        );

        let get_pod_logs = Tool::new(
            "get_pod_logs",
            "Fetch logs from a pod. Multi-container pods need container_name. \
            Set previous to read the logs of the last crashed container.",
            json!({
                "type": "object",
                "required": ["namespace", "pod_name"],
                "properties": {
                    "context": context_property,
                    "namespace": {"type": "string"},
                    "pod_name": {"type": "string"},
                    "container_name": {"type": "string", "default": null},
                    "tail_lines": {
                        "type": "integer",
                        "default": DEFAULT_TAIL_LINES,
                        "description": "Number of lines from the end of the log, at most 10000."
                    },
                    "since_seconds": {"type": "integer", "default": null},
                    "previous": {"type": "boolean", "default": false}
                }
            }),
        );

        Self {
            tools: vec![get_contexts, get_namespaces, list_pods, get_pod_logs],
            kubeconfig,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn context_name<'a>(&'a self, args: &'a Value) -> Result<&'a str, KubeError> {
        optional_str(args, "context")
            .or(self.kubeconfig.current_context.as_deref())
            .ok_or_else(|| KubeError::Context("no context given and no current-context set".into()))
    }

    async fn client(&self, context: &str) -> Result<Arc<KubeClient>, KubeError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(context) {
            return Ok(Arc::clone(client));
        }

        let resolved = self.kubeconfig.resolve(context)?;
        let client = Arc::new(KubeClient::new(&resolved)?);
        clients.insert(context.to_string(), Arc::clone(&client));
        Ok(client)
    }

    fn get_contexts(&self) -> Value {
        let contexts: Vec<Value> = self
            .kubeconfig
            .contexts
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "cluster": c.context.cluster.as_deref().unwrap_or("unknown"),
                    "user": c.context.user.as_deref().unwrap_or("unknown"),
                    "namespace": c.context.namespace.as_deref().unwrap_or("default"),
                })
            })
            .collect();

        json!({
            "contexts": contexts,
            "count": contexts.len(),
            "current_context": self.kubeconfig.current_context,
        })
    }

    async fn get_namespaces(&self, context: &str) -> Result<Value, KubeError> {
        let client = self.client(context).await?;
        let body = client.get_json("/api/v1/namespaces").await.map_err(|e| {
            e.into_kube_error(
                context,
                Wording {
                    forbidden: format!(
                        "Permission denied to list namespaces in context '{}'. Please check your Kubernetes RBAC permissions.",
                        context
                    ),
                    not_found: format!("Namespaces API not found in context '{}'.", context),
                    failed: format!("Failed to list namespaces in context {}", context),
                },
            )
        })?;

        let mut namespaces: Vec<String> = items(&body)
            .iter()
            .filter_map(|ns| ns.pointer("/metadata/name").and_then(|n| n.as_str()))
            .map(String::from)
            .collect();
        namespaces.sort();

        Ok(json!({
            "namespaces": namespaces,
            "count": namespaces.len(),
            "context": context,
        }))
    }

    async fn list_pods(&self, context: &str, namespace: &str) -> Result<Value, KubeError> {
        let client = self.client(context).await?;
        let body = client
            .get_json(&pods_path(namespace, None))
            .await
            .map_err(|e| {
                e.into_kube_error(
                    context,
                    Wording {
                        forbidden: format!(
                            "Permission denied to list pods in namespace '{}'. Please check your Kubernetes RBAC permissions.",
                            namespace
                        ),
                        not_found: format!(
                            "Namespace '{}' not found in context '{}'.",
                            namespace, context
                        ),
                        failed: format!("Failed to list pods in namespace '{}'", namespace),
                    },
                )
            })?;

        let now = chrono::Utc::now();
        let pods: Vec<Value> = items(&body).iter().map(|pod| summarize_pod(pod, now)).collect();

        Ok(json!({
            "pods": pods,
            "count": pods.len(),
            "namespace": namespace,
            "context": context,
        }))
    }

    async fn get_pod_logs(&self, context: &str, request: LogRequest<'_>) -> Result<Value, KubeError> {
        let LogRequest {
            namespace,
            pod_name,
            container_name,
            tail_lines,
            since_seconds,
            previous,
        } = request;
        let tail_lines = tail_lines.min(MAX_TAIL_LINES);
        let client = self.client(context).await?;

        let logs_wording = || Wording {
            forbidden: format!(
                "Permission denied to access logs in namespace '{}'. Please check your Kubernetes RBAC permissions.",
                namespace
            ),
            not_found: format!(
                "Pod '{}' not found in namespace '{}'. Please check the pod name and namespace.",
                pod_name, namespace
            ),
            failed: format!(
                "Failed to fetch logs from pod '{}' in namespace '{}'",
                pod_name, namespace
            ),
        };

        let pod = client
            .get_json(&pods_path(namespace, Some(pod_name)))
            .await
            .map_err(|e| e.into_kube_error(context, logs_wording()))?;

        let containers = container_names(&pod);
        let container = match container_name {
            Some(name) if containers.iter().any(|c| c == name) => Some(name.to_string()),
            Some(name) => {
                return Err(KubeError::UnknownContainer {
                    container: name.to_string(),
                    pod: pod_name.to_string(),
                    containers,
                })
            }
            None if containers.len() > 1 => {
                return Err(KubeError::ContainerRequired {
                    pod: pod_name.to_string(),
                    containers,
                })
            }
            None => containers.first().cloned(),
        };

        let mut query: Vec<(&str, String)> = vec![
            ("tailLines", tail_lines.to_string()),
            ("previous", previous.to_string()),
        ];
        if let Some(container) = &container {
            query.push(("container", container.clone()));
        }
        if let Some(since) = since_seconds.filter(|s| *s > 0) {
            query.push(("sinceSeconds", since.to_string()));
        }

        let path = format!("{}/log", pods_path(namespace, Some(pod_name)));
        let response = client
            .fetch(client.get(&path).query(&query))
            .await
            .map_err(|e| e.into_kube_error(context, logs_wording()))?;
        let logs = response
            .text()
            .await
            .map_err(|e| ApiFailure::from(e).into_kube_error(context, logs_wording()))?;

        let lines = logs.lines().count() as u64;
        Ok(json!({
            "logs": logs,
            "metadata": {
                "pod": pod_name,
                "namespace": namespace,
                "context": context,
                "container": container,
                "lines": lines,
                "tail_lines": tail_lines,
                "previous": previous,
                "truncated": lines >= tail_lines,
            }
        }))
    }

    async fn dispatch(&self, tool_call: &ToolCall) -> AgentResult<Result<Value, KubeError>> {
        let args = &tool_call.arguments;
        match tool_call.name.as_str() {
            "get_contexts" => Ok(Ok(self.get_contexts())),
            "get_namespaces" => {
                let context = match self.context_name(args) {
                    Ok(context) => context,
                    Err(e) => return Ok(Err(e)),
                };
                Ok(self.get_namespaces(context).await)
            }
            "list_pods" => {
                let namespace = required_str(args, "namespace")?;
                let context = match self.context_name(args) {
                    Ok(context) => context,
                    Err(e) => return Ok(Err(e)),
                };
                Ok(self.list_pods(context, namespace).await)
            }
            "get_pod_logs" => {
                let request = LogRequest {
                    namespace: required_str(args, "namespace")?,
                    pod_name: required_str(args, "pod_name")?,
                    container_name: optional_str(args, "container_name"),
                    tail_lines: optional_u64(args, "tail_lines")?.unwrap_or(DEFAULT_TAIL_LINES),
                    since_seconds: optional_u64(args, "since_seconds")?,
                    previous: optional_bool(args, "previous").unwrap_or(false),
                };
                let context = match self.context_name(args) {
                    Ok(context) => context,
                    Err(e) => return Ok(Err(e)),
                };
                Ok(self.get_pod_logs(context, request).await)
            }
            _ => Err(AgentError::ToolNotFound(tool_call.name.clone())),
        }
    }
}

struct LogRequest<'a> {
    namespace: &'a str,
    pod_name: &'a str,
    container_name: Option<&'a str>,
    tail_lines: u64,
    since_seconds: Option<u64>,
    previous: bool,
}

fn items(list: &Value) -> Vec<Value> {
    list.get("items")
        .and_then(|i| i.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Regular containers first, then init containers
fn container_names(pod: &Value) -> Vec<String> {
    ["/spec/containers", "/spec/initContainers"]
        .iter()
        .filter_map(|pointer| pod.pointer(pointer).and_then(|c| c.as_array()))
        .flatten()
        .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
        .map(String::from)
        .collect()
}

fn summarize_pod(pod: &Value, now: chrono::DateTime<chrono::Utc>) -> Value {
    let statuses = pod
        .pointer("/status/containerStatuses")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();
    let ready_count = statuses
        .iter()
        .filter(|s| s.get("ready").and_then(|r| r.as_bool()).unwrap_or(false))
        .count();
    let restarts: u64 = statuses
        .iter()
        .filter_map(|s| s.get("restartCount").and_then(|r| r.as_u64()))
        .sum();

    let age = pod
        .pointer("/metadata/creationTimestamp")
        .and_then(|t| t.as_str())
        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(|created| format_age((now - created.with_timezone(&chrono::Utc)).num_seconds()))
        .unwrap_or_default();

    json!({
        "name": pod.pointer("/metadata/name"),
        "ready": format!("{}/{}", ready_count, statuses.len()),
        "status": pod.pointer("/status/phase"),
        "restarts": restarts,
        "age": age,
        "node": pod.pointer("/spec/nodeName").and_then(|n| n.as_str()).unwrap_or("N/A"),
    })
}

/// kubectl style age: `45s`, `12m`, `3h`, `9d`
pub fn format_age(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3_600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h", seconds / 3_600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

#[async_trait]
impl System for KubernetesSystem {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn description(&self) -> &str {
        "Direct access to Kubernetes clusters from the local kubeconfig"
    }

    fn instructions(&self) -> &str {
        "Use the kubernetes tools to inspect clusters directly. Call get_contexts first when the \
        user has not named a cluster. For crashing pods fetch logs with previous set to true."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn status(&self) -> AnyhowResult<HashMap<String, Value>> {
        Ok(HashMap::from([
            ("configured".to_string(), json!(true)),
            ("contexts".to_string(), json!(self.kubeconfig.contexts.len())),
            (
                "current_context".to_string(),
                json!(self.kubeconfig.current_context),
            ),
            ("tools".to_string(), json!(self.tools.len())),
        ]))
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match self.dispatch(&tool_call).await? {
            Ok(value) => Ok(vec![Content::json(&value)]),
            Err(e) => {
                tracing::warn!(tool = %tool_call.name, error = %e, "kubernetes tool failed");
                Ok(vec![Content::json(&e.to_value())])
            }
        }
    }
}
