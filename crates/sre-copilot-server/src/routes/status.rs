use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub llm_configured: bool,
    pub llm_provider: String,
    pub llm_model: String,
    pub datadog_configured: bool,
    pub pagerduty_configured: bool,
    pub kubernetes_configured: bool,
    pub available_tools: usize,
    /// Live status reported by each configured tool set
    pub systems: Value,
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "SRE Copilot API",
        "version": env!("CARGO_PKG_VERSION"),
        "protocols": ["A2UI", "AG-UI"],
        "endpoints": {
            "stream": "POST /stream - SSE streaming chat",
            "chat": "POST /chat - Simple chat",
            "status": "GET /status - Agent status",
            "health": "GET /health - Health check"
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let agent = &state.agent;
    let systems = agent
        .status()
        .await
        .into_iter()
        .map(|s| (s.name.clone(), json!({"tools": s.tools, "status": s.status})))
        .collect::<serde_json::Map<String, Value>>();

    Json(StatusResponse {
        llm_configured: true,
        llm_provider: state.model.provider.clone(),
        llm_model: state.model.model.clone(),
        datadog_configured: agent.has_system("datadog"),
        pagerduty_configured: agent.has_system("pagerduty"),
        kubernetes_configured: agent.has_system("kubernetes"),
        available_tools: agent.tools().len(),
        systems: Value::Object(systems),
    })
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}
