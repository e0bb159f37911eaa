//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the kpf TUI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KpfConfig {
    /// Path to the kubeconfig file (None = standard lookup)
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to list (None = all namespaces)
    pub namespace: Option<String>,

    /// Upper bound on a forward becoming ready
    #[serde(with = "duration_secs")]
    pub establish_timeout: Duration,

    /// Timeout for the startup reachability check
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How often the view re-reads session state from the manager
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,

    /// Try the service port number as the local port before prompting
    pub prefer_service_port: bool,

    /// Initial sort field (namespace, name, status, ports, localport)
    pub default_sort: String,

    /// Rows moved by page up / page down
    pub page_size: usize,

    /// Log file (None = default location in the config directory)
    pub log_file: Option<PathBuf>,
}

impl Default for KpfConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace: None,
            establish_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(2),
            prefer_service_port: true,
            default_sort: "namespace".to_string(),
            page_size: 10,
            log_file: None,
        }
    }
}

impl KpfConfig {
    /// Resolved log file path
    pub fn log_path(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(super::default_log_path)
    }

    /// Namespace label for display (`all` when unrestricted)
    pub fn namespace_label(&self) -> &str {
        self.namespace.as_deref().unwrap_or("all")
    }
}
