//! Configuration management for kpf

mod app;
pub mod serde_utils;

pub use app::KpfConfig;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kpf")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Get the default log file path
pub fn default_log_path() -> PathBuf {
    default_config_dir().join("kpf.log")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let result: Result<KpfConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "namespace = \"web\"\nestablish_timeout = \"5s\"\nrefresh_interval = 2\n",
        )
        .unwrap();

        let loaded: KpfConfig = load_config(&path).unwrap();
        assert_eq!(loaded.namespace.as_deref(), Some("web"));
        assert_eq!(loaded.establish_timeout, Duration::from_secs(5));
        assert_eq!(loaded.refresh_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "prefer_service_port = false\n").unwrap();

        let loaded: KpfConfig = load_config(&path).unwrap();
        assert!(!loaded.prefer_service_port);
        assert_eq!(loaded.establish_timeout, Duration::from_secs(10));
        assert_eq!(loaded.default_sort, "namespace");
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "establish_timeout = \"soon\"\n").unwrap();

        let result: Result<KpfConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
