//! Discovery traits

use async_trait::async_trait;

use crate::error::DiscoveryError;
use crate::types::{PodTarget, ServiceRecord};

/// Source of services and their backing pods
#[async_trait]
pub trait Discovery: Send + Sync {
    /// List services, restricted to one namespace when given
    async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceRecord>, DiscoveryError>;

    /// Resolve a pod that can receive forwarded traffic for a service
    async fn resolve_endpoint(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<PodTarget, DiscoveryError>;
}
