use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use config::{Config, Environment};
use serde::Deserialize;
use sre_copilot::errors::AgentResult;
use sre_copilot::memory::DEFAULT_MAX_THREADS;
use sre_copilot::providers::configs::{
    AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig, ANTHROPIC_HOST,
    ANTHROPIC_MODEL, OPENAI_HOST, OPENAI_MODEL,
};
use sre_copilot::systems::kubeconfig;
use sre_copilot::systems::{DatadogConfig, PagerDutyConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Conversation threads kept in memory
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_threads: default_max_threads(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        #[serde(default = "anthropic_api_key")]
        api_key: Option<String>,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        #[serde(default = "openai_api_key")]
        api_key: Option<String>,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    /// Convert to the library's ProviderConfig; an API key is required for every provider
    pub fn into_config(self) -> Result<ProviderConfig, ConfigError> {
        match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => Ok(ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key: api_key.ok_or_else(|| missing("ANTHROPIC_API_KEY"))?,
                model,
                temperature,
                max_tokens,
            })),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => Ok(ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key: api_key.ok_or_else(|| missing("OPENAI_API_KEY"))?,
                model,
                temperature,
                max_tokens,
            })),
        }
    }
}

fn missing(env_var: &str) -> ConfigError {
    ConfigError::MissingEnvVar {
        env_var: env_var.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DatadogSettings {
    #[serde(default = "dd_api_key")]
    pub api_key: Option<String>,
    #[serde(default = "dd_app_key")]
    pub app_key: Option<String>,
    #[serde(default = "dd_site")]
    pub site: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

impl Default for DatadogSettings {
    fn default() -> Self {
        Self {
            api_key: dd_api_key(),
            app_key: dd_app_key(),
            site: dd_site(),
            host: None,
        }
    }
}

impl DatadogSettings {
    pub fn into_config(self) -> AgentResult<DatadogConfig> {
        let config = DatadogConfig::from_credentials(self.api_key, self.app_key, self.site)?;
        Ok(match self.host {
            Some(host) => config.with_host(host),
            None => config,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PagerDutySettings {
    #[serde(default = "pagerduty_api_key")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

impl Default for PagerDutySettings {
    fn default() -> Self {
        Self {
            api_key: pagerduty_api_key(),
            host: None,
        }
    }
}

impl PagerDutySettings {
    pub fn into_config(self) -> AgentResult<PagerDutyConfig> {
        let config = PagerDutyConfig::from_credentials(self.api_key)?;
        Ok(match self.host {
            Some(host) => config.with_host(host),
            None => config,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct KubernetesSettings {
    /// Overrides `KUBECONFIG` and `~/.kube/config`
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

impl KubernetesSettings {
    pub fn kubeconfig_path(&self) -> PathBuf {
        match &self.kubeconfig {
            Some(path) => kubeconfig::expand_path(path),
            None => kubeconfig::default_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub datadog: DatadogSettings,
    #[serde(default)]
    pub pagerduty: PagerDutySettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("provider.type", "anthropic")?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Value of a conventional environment variable, ignoring blanks
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_threads() -> usize {
    DEFAULT_MAX_THREADS
}

fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_anthropic_model() -> String {
    env_value("CLAUDE_MODEL").unwrap_or_else(|| ANTHROPIC_MODEL.to_string())
}

fn anthropic_api_key() -> Option<String> {
    env_value("ANTHROPIC_API_KEY")
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    env_value("OPENAI_MODEL").unwrap_or_else(|| OPENAI_MODEL.to_string())
}

fn openai_api_key() -> Option<String> {
    env_value("OPENAI_API_KEY")
}

fn dd_api_key() -> Option<String> {
    env_value("DD_API_KEY")
}

fn dd_app_key() -> Option<String> {
    env_value("DD_APP_KEY")
}

fn dd_site() -> Option<String> {
    env_value("DD_SITE")
}

fn pagerduty_api_key() -> Option<String> {
    env_value("PAGERDUTY_API_KEY")
}
