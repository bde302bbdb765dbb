use sre_copilot::agent::Agent;
use sre_copilot::memory::ThreadStore;
use std::sync::Arc;

/// Which model backs the agent, reported by `GET /status`
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub threads: ThreadStore,
    pub model: ModelInfo,
}

impl AppState {
    pub fn new(agent: Agent, model: ModelInfo, max_threads: usize) -> Self {
        Self {
            agent: Arc::new(agent),
            threads: ThreadStore::with_capacity(max_threads),
            model,
        }
    }
}
