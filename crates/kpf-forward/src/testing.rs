//! Scripted collaborators for exercising the manager without a cluster

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use kpf_core::{
    Discovery, DiscoveryError, PodTarget, ServiceRecord, TunnelError, TunnelProvider,
    TunnelSignals,
};

/// In-memory service catalogue
#[derive(Default)]
pub struct FakeDiscovery {
    services: Mutex<Vec<ServiceRecord>>,
    endpoints: Mutex<HashMap<(String, String), Result<PodTarget, DiscoveryError>>>,
    list_error: Mutex<Option<DiscoveryError>>,
    resolve_delay: Mutex<Option<Duration>>,
    resolve_calls: AtomicUsize,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a service whose endpoint resolves to `<name>-0`
    pub fn with_service(self, service: ServiceRecord) -> Self {
        self.services.lock().push(service);
        self
    }

    pub fn set_services(&self, services: Vec<ServiceRecord>) {
        *self.services.lock() = services;
    }

    /// Override how one service resolves
    pub fn set_endpoint(
        &self,
        namespace: &str,
        service: &str,
        result: Result<PodTarget, DiscoveryError>,
    ) {
        self.endpoints
            .lock()
            .insert((namespace.to_string(), service.to_string()), result);
    }

    /// Make `list_services` fail until cleared with `None`
    pub fn set_list_error(&self, err: Option<DiscoveryError>) {
        *self.list_error.lock() = err;
    }

    /// Delay every `resolve_endpoint` call
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock() = Some(delay);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discovery for FakeDiscovery {
    async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceRecord>, DiscoveryError> {
        if let Some(err) = self.list_error.lock().clone() {
            return Err(err);
        }
        Ok(self
            .services
            .lock()
            .iter()
            .filter(|s| namespace.map_or(true, |ns| s.namespace == ns))
            .cloned()
            .collect())
    }

    async fn resolve_endpoint(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<PodTarget, DiscoveryError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.resolve_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let key = (namespace.to_string(), service.to_string());
        if let Some(result) = self.endpoints.lock().get(&key) {
            return result.clone();
        }

        let known = self
            .services
            .lock()
            .iter()
            .any(|s| s.namespace == namespace && s.name == service);
        if known {
            Ok(PodTarget::new(namespace, format!("{}-0", service)))
        } else {
            Err(DiscoveryError::NotFound(format!("{}/{}", namespace, service)))
        }
    }
}

/// How a fake tunnel behaves once established
#[derive(Debug, Clone)]
pub enum TunnelBehavior {
    /// Ready immediately, forwards until cancelled
    Ready,
    /// Ready after a delay
    ReadyAfter(Duration),
    /// Report a setup failure after a delay
    FailAfter(Duration, String),
    /// Never report anything
    Never,
    /// Ready immediately, then exits on its own after a delay
    ExitAfter(Duration, String),
}

/// One recorded `establish` call
#[derive(Debug, Clone)]
pub struct Establishment {
    pub target: PodTarget,
    pub local_port: u16,
    pub remote_port: u16,
    pub cancel: CancellationToken,
}

/// Tunnel provider driven by a [`TunnelBehavior`]
pub struct FakeTunnel {
    behavior: Mutex<TunnelBehavior>,
    establishments: Mutex<Vec<Establishment>>,
}

impl FakeTunnel {
    pub fn new(behavior: TunnelBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            establishments: Mutex::new(Vec::new()),
        }
    }

    /// Change the behavior for subsequent `establish` calls
    pub fn set_behavior(&self, behavior: TunnelBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn establishments(&self) -> Vec<Establishment> {
        self.establishments.lock().clone()
    }

    /// Tunnels whose cancellation has not fired
    pub fn live_count(&self) -> usize {
        self.establishments
            .lock()
            .iter()
            .filter(|e| !e.cancel.is_cancelled())
            .count()
    }
}

impl Default for FakeTunnel {
    fn default() -> Self {
        Self::new(TunnelBehavior::Ready)
    }
}

impl TunnelProvider for FakeTunnel {
    fn establish(
        &self,
        target: PodTarget,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> TunnelSignals {
        self.establishments.lock().push(Establishment {
            target,
            local_port,
            remote_port,
            cancel: cancel.clone(),
        });

        let behavior = self.behavior.lock().clone();
        let (mut notifier, signals) = TunnelSignals::channel();

        tokio::spawn(async move {
            match behavior {
                TunnelBehavior::Ready => notifier.ready(),
                TunnelBehavior::ReadyAfter(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => notifier.ready(),
                    }
                }
                TunnelBehavior::FailAfter(delay, message) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            notifier.failed(TunnelError::Upstream(message));
                        }
                    }
                    return;
                }
                TunnelBehavior::Never => {}
                TunnelBehavior::ExitAfter(delay, reason) => {
                    notifier.ready();
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => notifier.exited(reason),
                    }
                    return;
                }
            }
            cancel.cancelled().await;
            drop(notifier);
        });

        signals
    }
}
