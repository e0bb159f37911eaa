//! kpf-kube: Kubernetes backend for kpf
//!
//! Implements [`Discovery`](kpf_core::Discovery) over the Services, Pods and
//! Endpoints APIs and [`TunnelProvider`](kpf_core::TunnelProvider) over the
//! pod `portforward` subresource.

pub mod client;
pub mod discovery;
pub mod tunnel;

pub use client::{connect, ClusterConnection, ConnectError};
pub use discovery::KubeDiscovery;
pub use tunnel::KubeTunnelProvider;
