//! Minimal kubeconfig model: enough of the file to reach a cluster's REST API
//! with the credentials kubectl would use for a given context.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::kubernetes::KubeError;

pub const DEFAULT_KUBECONFIG: &str = "~/.kube/config";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Kubeconfig {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default, rename = "current-context")]
    pub current_context: Option<String>,
    /// Directory relative file references are resolved against
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: Cluster,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    #[serde(default)]
    pub server: String,
    pub certificate_authority: Option<String>,
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: AuthInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    pub token: Option<String>,
    #[serde(rename = "tokenFile")]
    pub token_file: Option<String>,
    pub client_certificate: Option<String>,
    pub client_certificate_data: Option<String>,
    pub client_key: Option<String>,
    pub client_key_data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: ContextInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextInfo {
    pub cluster: Option<String>,
    pub user: Option<String>,
    pub namespace: Option<String>,
}

/// Everything needed to talk to one context's cluster
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub name: String,
    pub server: String,
    pub namespace: String,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub token: Option<String>,
    /// Client certificate followed by its private key
    pub identity_pem: Option<Vec<u8>>,
}

impl Kubeconfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, KubeError> {
        serde_yaml::from_str(yaml).map_err(|e| KubeError::InvalidKubeconfig(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, KubeError> {
        if !path.exists() {
            return Err(KubeError::KubeconfigNotFound(path.display().to_string()));
        }
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| KubeError::InvalidKubeconfig(e.to_string()))?;
        let mut config = Self::from_yaml(&yaml)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn context(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn resolve(&self, name: &str) -> Result<ResolvedContext, KubeError> {
        let context = self
            .context(name)
            .ok_or_else(|| KubeError::Context(name.to_string()))?;

        let cluster_name = context.context.cluster.as_deref().unwrap_or_default();
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == cluster_name)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                KubeError::InvalidKubeconfig(format!(
                    "cluster '{}' used by context '{}' is not defined",
                    cluster_name, name
                ))
            })?;
        if cluster.server.is_empty() {
            return Err(KubeError::InvalidKubeconfig(format!(
                "cluster '{}' has no server",
                cluster_name
            )));
        }

        let auth = context
            .context
            .user
            .as_deref()
            .and_then(|user| self.users.iter().find(|u| u.name == user))
            .map(|u| u.user.clone())
            .unwrap_or_default();

        let ca_pem = self.material(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
        )?;

        let token = match (&auth.token, &auth.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(file)) => {
                let contents = std::fs::read_to_string(self.relative(file))
                    .map_err(|e| KubeError::InvalidKubeconfig(format!("{}: {}", file, e)))?;
                Some(contents.trim().to_string())
            }
            (None, None) => None,
        };

        let certificate = self.material(
            auth.client_certificate_data.as_deref(),
            auth.client_certificate.as_deref(),
        )?;
        let key = self.material(auth.client_key_data.as_deref(), auth.client_key.as_deref())?;
        let identity_pem = match (certificate, key) {
            (Some(mut certificate), Some(key)) => {
                if !certificate.ends_with(b"\n") {
                    certificate.push(b'\n');
                }
                certificate.extend_from_slice(&key);
                Some(certificate)
            }
            _ => None,
        };

        Ok(ResolvedContext {
            name: name.to_string(),
            server: cluster.server.clone(),
            namespace: context
                .context
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            token,
            identity_pem,
        })
    }

    fn relative(&self, file: &str) -> PathBuf {
        let path = expand_path(file);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    /// Inline base64 `*-data` wins over the file reference
    fn material(&self, data: Option<&str>, file: Option<&str>) -> Result<Option<Vec<u8>>, KubeError> {
        if let Some(data) = data {
            let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
            return STANDARD
                .decode(cleaned)
                .map(Some)
                .map_err(|e| KubeError::InvalidKubeconfig(format!("invalid base64 data: {}", e)));
        }
        match file {
            Some(file) => std::fs::read(self.relative(file))
                .map(Some)
                .map_err(|e| KubeError::InvalidKubeconfig(format!("{}: {}", file, e))),
            None => Ok(None),
        }
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// First entry of `KUBECONFIG`, falling back to `~/.kube/config`
pub fn default_path() -> PathBuf {
    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
            return first;
        }
    }
    expand_path(DEFAULT_KUBECONFIG)
}
