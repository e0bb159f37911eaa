//! Local listener proxied through the pod `portforward` subresource
//!
//! Each accepted connection gets its own port-forward stream, the same way
//! `kubectl port-forward` multiplexes connections.

use std::net::{Ipv4Addr, SocketAddr};

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use kpf_core::{PodTarget, TunnelError, TunnelNotifier, TunnelProvider, TunnelSignals};

/// [`TunnelProvider`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeTunnelProvider {
    client: Client,
}

impl KubeTunnelProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl TunnelProvider for KubeTunnelProvider {
    fn establish(
        &self,
        target: PodTarget,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> TunnelSignals {
        let (notifier, signals) = TunnelSignals::channel();
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let worker = TunnelWorker {
            pods,
            pod: target.pod,
            local_port,
            remote_port,
            cancel,
        };
        tokio::spawn(worker.run(notifier));
        signals
    }
}

struct TunnelWorker {
    pods: Api<Pod>,
    pod: String,
    local_port: u16,
    remote_port: u16,
    cancel: CancellationToken,
}

impl TunnelWorker {
    async fn run(self, mut notifier: TunnelNotifier) {
        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, self.local_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                notifier.failed(TunnelError::Bind {
                    port: self.local_port,
                    message: e.to_string(),
                });
                return;
            }
        };

        let probe = tokio::select! {
            _ = self.cancel.cancelled() => return,
            probe = self.probe() => probe,
        };
        if let Err(message) = probe {
            notifier.failed(TunnelError::Upstream(message));
            return;
        }
        notifier.ready();
        tracing::debug!(
            "Listening on 127.0.0.1:{} for pod {}:{}",
            self.local_port,
            self.pod,
            self.remote_port
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::warn!("Accept failed on port {}: {}", self.local_port, e);
                        notifier.exited(format!("accept failed: {}", e));
                        break;
                    }
                },
            }
        }
        tracing::debug!("Tunnel on port {} closed", self.local_port);
    }

    /// Open and discard one stream so an unreachable pod fails the start
    async fn probe(&self) -> Result<(), String> {
        let mut forwarder = self
            .pods
            .portforward(&self.pod, &[self.remote_port])
            .await
            .map_err(|e| e.to_string())?;
        let stream = forwarder.take_stream(self.remote_port);
        drop(stream);
        forwarder.abort();
        Ok(())
    }

    fn spawn_connection(&self, mut client: TcpStream, peer: SocketAddr) {
        let pods = self.pods.clone();
        let pod = self.pod.clone();
        let port = self.remote_port;
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            tracing::debug!("Connection from {} to {}:{}", peer, pod, port);
            let result = tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                result = forward_connection(&pods, &pod, port, &mut client) => result,
            };
            if let Err(message) = result {
                tracing::warn!("Forwarding {} to {}:{} failed: {}", peer, pod, port, message);
            }
        });
    }
}

async fn forward_connection(
    pods: &Api<Pod>,
    pod: &str,
    port: u16,
    client: &mut TcpStream,
) -> Result<(), String> {
    let mut forwarder = pods
        .portforward(pod, &[port])
        .await
        .map_err(|e| e.to_string())?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or_else(|| format!("no stream for port {}", port))?;

    tokio::io::copy_bidirectional(client, &mut upstream)
        .await
        .map_err(|e| e.to_string())?;

    drop(upstream);
    forwarder.join().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Config;

    fn offline_client() -> Client {
        let config = Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = held.local_addr().unwrap().port();

        let provider = KubeTunnelProvider::new(offline_client());
        let signals = provider.establish(
            PodTarget::new("web", "frontend-abc"),
            port,
            80,
            CancellationToken::new(),
        );

        let outcome = signals.ready.await.unwrap();
        assert!(matches!(outcome, Err(TunnelError::Bind { port: p, .. }) if p == port));
    }

    #[tokio::test]
    async fn test_unreachable_api_server_fails_probe() {
        let provider = KubeTunnelProvider::new(offline_client());
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };

        let signals = provider.establish(
            PodTarget::new("web", "frontend-abc"),
            port,
            80,
            CancellationToken::new(),
        );

        let outcome = signals.ready.await.unwrap();
        assert!(matches!(outcome, Err(TunnelError::Upstream(_))));
    }
}
