use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub const ENV_PREFIX: &str = "SRE_COPILOT";

/// Errors returned to HTTP clients as `{"detail": ...}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({"detail": self.to_string()}))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable for a dotted settings path, e.g. `provider.api_key`
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        field_path.to_uppercase().replace('.', "__")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "SRE_COPILOT_PROVIDER__API_KEY");
        assert_eq!(to_env_var("server.port"), "SRE_COPILOT_SERVER__PORT");
        assert_eq!(to_env_var("type"), "SRE_COPILOT_TYPE");
    }

    #[test]
    fn test_missing_env_var_message() {
        let err = ConfigError::MissingEnvVar {
            env_var: "ANTHROPIC_API_KEY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: ANTHROPIC_API_KEY"
        );
    }
}
