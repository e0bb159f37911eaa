//! Core error types for kpf

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::SessionKey;

/// Why a forward could not be started, or why it stopped.
///
/// Every variant is terminal for the attempted operation; retrying is
/// always a fresh `start`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// A pending or active session already exists for the key
    #[error("port forwarding already active for {0}")]
    AlreadyActive(SessionKey),

    /// The discovery backend failed
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    /// The service has no backing pod
    #[error("no endpoints for service {0}")]
    NoEndpoints(String),

    /// A requested local port is not available
    #[error("port {0} is already in use")]
    PortInUse(u16),

    /// No ephemeral port could be allocated
    #[error("failed to allocate a local port: {0}")]
    AllocationFailed(String),

    /// The tunnel did not become ready in time
    #[error("timeout after {0:?} waiting for port forward to be ready")]
    EstablishTimeout(Duration),

    /// The tunnel provider reported a failure
    #[error("port forwarding failed: {0}")]
    EstablishFailed(String),

    /// The attempt was cancelled by the caller or by `stop`
    #[error("cancelled")]
    Cancelled,
}

impl ForwardError {
    /// Whether this failure is recorded on the session table
    pub fn is_recorded(&self) -> bool {
        !matches!(self, ForwardError::AlreadyActive(_) | ForwardError::PortInUse(_))
    }
}

/// Discovery collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Service exists but nothing backs it
    #[error("no endpoints: {0}")]
    NoEndpoints(String),

    /// Service not found
    #[error("service not found: {0}")]
    NotFound(String),

    /// API call failed
    #[error("API error: {0}")]
    Api(String),
}

impl From<DiscoveryError> for ForwardError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NoEndpoints(service) => ForwardError::NoEndpoints(service),
            other => ForwardError::DiscoveryFailed(other.to_string()),
        }
    }
}

/// Tunnel provider errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    /// Local listener could not be bound
    #[error("failed to bind local port {port}: {message}")]
    Bind {
        /// Local port
        port: u16,
        /// OS error text
        message: String,
    },

    /// Upstream port-forward stream could not be opened
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

}
