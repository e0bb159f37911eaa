//! Cluster client construction

use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use thiserror::Error;

/// Errors while connecting to the cluster
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Kubeconfig could not be read or has no usable context
    #[error("Invalid kubeconfig {path}: {message}")]
    Kubeconfig { path: String, message: String },

    /// Client could not be built from the resolved config
    #[error("Failed to create client: {0}")]
    Client(#[from] kube::Error),

    /// API server rejected or failed the version request
    #[error("Cluster {host} is unreachable: {message}")]
    Unreachable { host: String, message: String },

    /// API server did not answer in time
    #[error("Timed out after {timeout:?} connecting to {host}")]
    Timeout { host: String, timeout: Duration },
}

/// A verified connection to a cluster
#[derive(Clone)]
pub struct ClusterConnection {
    /// API client
    pub client: Client,
    /// API server host for display
    pub host: String,
    /// Where the configuration came from
    pub config_source: String,
    /// Server version reported by the API server
    pub server_version: String,
}

/// Build a client and check that the API server answers.
///
/// `kubeconfig` overrides the standard lookup (`KUBECONFIG`,
/// `~/.kube/config`, in-cluster service account).
pub async fn connect(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
) -> Result<ClusterConnection, ConnectError> {
    let config = load_config(kubeconfig).await?;
    let host = config
        .cluster_url
        .host()
        .unwrap_or("unknown")
        .to_string();
    let config_source = config_source(kubeconfig);

    let client = Client::try_from(config)?;

    tracing::debug!("Checking API server {} ({})", host, config_source);
    let info = tokio::time::timeout(connect_timeout, client.apiserver_version())
        .await
        .map_err(|_| ConnectError::Timeout {
            host: host.clone(),
            timeout: connect_timeout,
        })?
        .map_err(|e| ConnectError::Unreachable {
            host: host.clone(),
            message: e.to_string(),
        })?;

    tracing::info!("Connected to {} (Kubernetes {})", host, info.git_version);

    Ok(ClusterConnection {
        client,
        host,
        config_source,
        server_version: info.git_version,
    })
}

async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, ConnectError> {
    match kubeconfig {
        Some(path) => {
            let invalid = |message: String| ConnectError::Kubeconfig {
                path: path.display().to_string(),
                message,
            };
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| invalid(e.to_string()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| invalid(e.to_string()))
        }
        None => Config::infer().await.map_err(|e| ConnectError::Kubeconfig {
            path: config_source(None),
            message: e.to_string(),
        }),
    }
}

/// Display label for the configuration in use
fn config_source(kubeconfig: Option<&Path>) -> String {
    if let Some(path) = kubeconfig {
        return path.display().to_string();
    }
    if let Some(env) = std::env::var_os("KUBECONFIG").filter(|v| !v.is_empty()) {
        return PathBuf::from(env).display().to_string();
    }
    match dirs::home_dir().map(|home| home.join(".kube").join("config")) {
        Some(path) if path.exists() => path.display().to_string(),
        _ => "in-cluster".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_source_prefers_explicit_path() {
        let path = Path::new("/tmp/kind.yaml");
        assert_eq!(config_source(Some(path)), "/tmp/kind.yaml");
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_is_error() {
        let path = Path::new("/nonexistent/kpf/kubeconfig.yaml");
        let err = connect(Some(path), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Kubeconfig { .. }));
    }
}
