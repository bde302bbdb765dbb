mod configuration;
mod error;
mod routes;
mod state;

#[cfg(test)]
mod testing;

use anyhow::Context;
use configuration::Settings;
use sre_copilot::agent::Agent;
use sre_copilot::errors::AgentResult;
use sre_copilot::providers::factory;
use sre_copilot::systems::{DatadogSystem, KubernetesSystem, PagerDutySystem, System};
use state::{AppState, ModelInfo};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Add a tool set if it could be configured; missing credentials only disable it
fn add_integration<S: System + 'static>(agent: &mut Agent, label: &str, system: AgentResult<S>) {
    match system {
        Ok(system) => {
            info!("{} tools enabled", label);
            agent.add_system(Box::new(system));
        }
        Err(e) => info!("{} tools disabled: {}", label, e),
    }
}

fn build_agent(settings: Settings) -> anyhow::Result<(Agent, ModelInfo)> {
    let provider_config = settings.provider.into_config()?;
    let model = ModelInfo {
        provider: provider_config.provider_type().to_string(),
        model: provider_config.model().to_string(),
    };

    let provider = factory::get_provider(provider_config)?;
    let mut agent = Agent::new(provider);

    add_integration(
        &mut agent,
        "Datadog",
        settings.datadog.into_config().and_then(DatadogSystem::new),
    );
    add_integration(
        &mut agent,
        "PagerDuty",
        settings.pagerduty.into_config().and_then(PagerDutySystem::new),
    );
    add_integration(
        &mut agent,
        "Kubernetes",
        KubernetesSystem::new(settings.kubernetes.kubeconfig_path()),
    );

    Ok((agent, model))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new().context("Failed to load configuration")?;
    let addr = settings.server.socket_addr()?;
    let max_threads = settings.server.max_threads;

    let (agent, model) = build_agent(settings).context("Failed to set up the model provider")?;
    info!(
        provider = %model.provider,
        model = %model.model,
        tools = agent.tools().len(),
        "agent initialized"
    );

    let app = routes::configure(AppState::new(agent, model, max_threads));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
