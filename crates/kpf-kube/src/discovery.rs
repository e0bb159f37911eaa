//! Service discovery over the Kubernetes API

use std::collections::BTreeMap;
use std::time::SystemTime;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ListParams;
use kube::{Api, Client};

use kpf_core::{Discovery, DiscoveryError, PodTarget, PortRecord, ServiceRecord};

/// [`Discovery`] backed by a cluster client
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn endpoint_pod(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<String>, DiscoveryError> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let endpoints = api.get_opt(service).await.map_err(api_error)?;
        Ok(endpoints.as_ref().and_then(endpoint_pod_name))
    }
}

#[async_trait]
impl Discovery for KubeDiscovery {
    async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceRecord>, DiscoveryError> {
        let api: Api<Service> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api.list(&ListParams::default()).await.map_err(api_error)?;
        tracing::debug!("Listed {} services", list.items.len());
        Ok(list.items.iter().map(service_record).collect())
    }

    async fn resolve_endpoint(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<PodTarget, DiscoveryError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = services
            .get_opt(service)
            .await
            .map_err(api_error)?
            .ok_or_else(|| DiscoveryError::NotFound(format!("{}/{}", namespace, service)))?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.as_ref())
            .filter(|selector| !selector.is_empty())
            .map(label_selector);

        let mut pod = match selector {
            Some(selector) => {
                let list = pods
                    .list(&ListParams::default().labels(&selector))
                    .await
                    .map_err(api_error)?;
                list.items.into_iter().find(is_running)
            }
            None => None,
        };

        if pod.is_none() {
            // Services without a selector are backed by manually managed Endpoints
            if let Some(name) = self.endpoint_pod(namespace, service).await? {
                pod = pods.get_opt(&name).await.map_err(api_error)?;
            }
        }

        let pod = pod
            .ok_or_else(|| DiscoveryError::NoEndpoints(format!("{}/{}", namespace, service)))?;
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        tracing::debug!("Service {}/{} resolved to pod {}", namespace, service, pod_name);

        Ok(PodTarget {
            namespace: namespace.to_string(),
            pod: pod_name,
            port_map: port_map(&svc, &pod),
        })
    }
}

fn api_error(err: kube::Error) -> DiscoveryError {
    DiscoveryError::Api(err.to_string())
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some("Running")
}

fn endpoint_pod_name(endpoints: &Endpoints) -> Option<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .filter_map(|address| address.target_ref.as_ref())
        .filter(|target| target.kind.as_deref().map_or(true, |kind| kind == "Pod"))
        .find_map(|target| target.name.clone())
}

/// Convert a Service object into a record
pub fn service_record(svc: &Service) -> ServiceRecord {
    let spec = svc.spec.clone().unwrap_or_default();

    let load_balancer = svc
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|ingress| ingress.ip.clone().or_else(|| ingress.hostname.clone()));
    let external_ip = load_balancer.or_else(|| {
        spec.external_ips
            .as_ref()
            .and_then(|ips| ips.first().cloned())
    });

    ServiceRecord {
        namespace: svc.metadata.namespace.clone().unwrap_or_default(),
        name: svc.metadata.name.clone().unwrap_or_default(),
        kind: spec.type_.clone().unwrap_or_else(|| "ClusterIP".to_string()),
        cluster_ip: spec.cluster_ip.clone().filter(|ip| !ip.is_empty()),
        external_ip,
        created_at: svc
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| SystemTime::from(t.0)),
        selector: spec.selector.clone().unwrap_or_default(),
        ports: spec.ports.iter().flatten().map(port_record).collect(),
    }
}

fn port_record(port: &ServicePort) -> PortRecord {
    PortRecord {
        name: port.name.clone().unwrap_or_default(),
        port: to_port(port.port),
        target_port: match &port.target_port {
            Some(IntOrString::Int(p)) => Some(to_port(*p)),
            Some(IntOrString::String(_)) => None,
            None => Some(to_port(port.port)),
        },
        protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
    }
}

fn to_port(value: i32) -> u16 {
    u16::try_from(value).unwrap_or(0)
}

/// Map each service port to the container port it targets on `pod`
fn port_map(svc: &Service, pod: &Pod) -> BTreeMap<u16, u16> {
    let container_ports: BTreeMap<String, u16> = pod
        .spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|container| container.ports.iter().flatten())
        .filter_map(|p| Some((p.name.clone()?, to_port(p.container_port))))
        .collect();

    svc.spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .filter_map(|port| {
            let service_port = to_port(port.port);
            let target = match &port.target_port {
                Some(IntOrString::Int(p)) => to_port(*p),
                Some(IntOrString::String(name)) => *container_ports.get(name)?,
                None => service_port,
            };
            Some((service_port, target))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, EndpointAddress, EndpointSubset, LoadBalancerIngress,
        LoadBalancerStatus, ObjectReference, PodSpec, PodStatus, ServiceSpec, ServiceStatus,
    };
    use kube::api::ObjectMeta;

    fn service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("frontend".into()),
                namespace: Some("web".into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".into()),
                cluster_ip: Some("10.0.0.12".into()),
                selector: Some(BTreeMap::from([("app".to_string(), "frontend".to_string())])),
                ports: Some(vec![
                    ServicePort {
                        name: Some("http".into()),
                        port: 80,
                        target_port: Some(IntOrString::String("web".into())),
                        protocol: Some("TCP".into()),
                        ..Default::default()
                    },
                    ServicePort {
                        port: 9090,
                        target_port: Some(IntOrString::Int(9091)),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress {
                        hostname: Some("lb.example.com".into()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    fn pod(phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("frontend-abc".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".into(),
                    ports: Some(vec![ContainerPort {
                        name: Some("web".into()),
                        container_port: 8080,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.into()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_service_record_conversion() {
        let record = service_record(&service());
        assert_eq!(record.namespace, "web");
        assert_eq!(record.kind, "LoadBalancer");
        assert_eq!(record.cluster_ip.as_deref(), Some("10.0.0.12"));
        assert_eq!(record.external_ip.as_deref(), Some("lb.example.com"));
        assert_eq!(record.ports.len(), 2);
        assert_eq!(record.ports[0].target_port, None);
        assert_eq!(record.ports[1].name, "");
        assert_eq!(record.ports[1].protocol, "TCP");
        assert_eq!(record.ports[1].target_port, Some(9091));
    }

    #[test]
    fn test_portless_service_has_no_ports() {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some("headless".into()),
                namespace: Some("web".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let record = service_record(&svc);
        assert!(record.ports.is_empty());
        assert_eq!(record.kind, "ClusterIP");
    }

    #[test]
    fn test_port_map_resolves_named_ports() {
        let map = port_map(&service(), &pod("Running"));
        assert_eq!(map.get(&80), Some(&8080));
        assert_eq!(map.get(&9090), Some(&9091));
    }

    #[test]
    fn test_running_pod_selection() {
        assert!(is_running(&pod("Running")));
        assert!(!is_running(&pod("Pending")));
    }

    #[test]
    fn test_label_selector() {
        let labels = BTreeMap::from([
            ("app".to_string(), "frontend".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "app=frontend,tier=web");
    }

    #[test]
    fn test_endpoint_pod_name() {
        let endpoints = Endpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.1.0.7".into(),
                    target_ref: Some(ObjectReference {
                        kind: Some("Pod".into()),
                        name: Some("frontend-abc".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert_eq!(endpoint_pod_name(&endpoints).as_deref(), Some("frontend-abc"));
        assert_eq!(endpoint_pod_name(&Endpoints::default()), None);
    }
}
