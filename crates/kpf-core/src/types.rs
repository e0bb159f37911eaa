//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Identity of a forward: one remote port of one service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    /// Service namespace
    pub namespace: String,
    /// Service name
    pub service: String,
    /// Declared service port
    pub remote_port: u16,
}

impl SessionKey {
    /// Create a new session key
    pub fn new(namespace: impl Into<String>, service: impl Into<String>, remote_port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            remote_port,
        }
    }

    /// Whether this key belongs to the given service
    pub fn is_service(&self, namespace: &str, service: &str) -> bool {
        self.namespace == namespace && self.service == service
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.service, self.remote_port)
    }
}

/// Lifecycle state of a forward.
///
/// Declaration order is the ordinal used when sorting by status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ForwardState {
    /// No session exists for the key
    #[default]
    Inactive,
    /// Session registered, tunnel not yet ready
    Pending,
    /// Tunnel is ready and forwarding
    Active,
    /// Session failed; stays visible until cleared
    Failed,
}

impl ForwardState {
    /// Parse a state name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inactive" => Some(Self::Inactive),
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ForwardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardState::Inactive => write!(f, "inactive"),
            ForwardState::Pending => write!(f, "pending"),
            ForwardState::Active => write!(f, "active"),
            ForwardState::Failed => write!(f, "failed"),
        }
    }
}

/// A port declared by a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    /// Port name (may be empty)
    pub name: String,
    /// Declared service port
    pub port: u16,
    /// Numeric target port, if the service declares one
    pub target_port: Option<u16>,
    /// Protocol (TCP, UDP, SCTP)
    pub protocol: String,
}

impl PortRecord {
    /// Create a TCP port record with the target port equal to the service port
    pub fn tcp(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            target_port: Some(port),
            protocol: "TCP".to_string(),
        }
    }
}

/// Snapshot of a discovered service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Namespace
    pub namespace: String,
    /// Service name
    pub name: String,
    /// Service type (ClusterIP, NodePort, LoadBalancer, ExternalName)
    pub kind: String,
    /// Cluster IP, when allocated
    pub cluster_ip: Option<String>,
    /// First external address (load balancer ingress or external IP)
    pub external_ip: Option<String>,
    /// Creation timestamp
    pub created_at: Option<SystemTime>,
    /// Pod selector labels
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Declared ports
    pub ports: Vec<PortRecord>,
}

impl ServiceRecord {
    /// Create a ClusterIP service record with no ports
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: "ClusterIP".to_string(),
            cluster_ip: None,
            external_ip: None,
            created_at: None,
            selector: BTreeMap::new(),
            ports: vec![],
        }
    }

    /// Builder: set the service type
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Builder: add a port
    pub fn with_port(mut self, port: PortRecord) -> Self {
        self.ports.push(port);
        self
    }

    /// Session key for one of this service's ports
    pub fn key_for(&self, port: u16) -> SessionKey {
        SessionKey::new(&self.namespace, &self.name, port)
    }
}

/// Pod resolved to back a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
    /// Namespace of the pod
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Service port to container port mapping
    pub port_map: BTreeMap<u16, u16>,
}

impl PodTarget {
    /// Create a target with an identity port mapping
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            port_map: BTreeMap::new(),
        }
    }

    /// Container port to dial for a service port
    pub fn container_port(&self, service_port: u16) -> u16 {
        self.port_map
            .get(&service_port)
            .copied()
            .unwrap_or(service_port)
    }
}

impl fmt::Display for PodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_display() {
        let key = SessionKey::new("web", "frontend", 80);
        assert_eq!(key.to_string(), "web/frontend:80");
        assert!(key.is_service("web", "frontend"));
        assert!(!key.is_service("web", "backend"));
    }

    #[test]
    fn test_forward_state_ordinal() {
        assert!(ForwardState::Inactive < ForwardState::Pending);
        assert!(ForwardState::Pending < ForwardState::Active);
        assert!(ForwardState::Active < ForwardState::Failed);
    }

    #[test]
    fn test_forward_state_parse() {
        assert_eq!(ForwardState::parse("ACTIVE"), Some(ForwardState::Active));
        assert_eq!(ForwardState::parse("failed"), Some(ForwardState::Failed));
        assert_eq!(ForwardState::parse("bogus"), None);
        assert_eq!(format!("{}", ForwardState::Pending), "pending");
    }

    #[test]
    fn test_pod_target_container_port() {
        let mut target = PodTarget::new("web", "frontend-abc");
        target.port_map.insert(80, 8080);
        assert_eq!(target.container_port(80), 8080);
        assert_eq!(target.container_port(443), 443);
    }
}
