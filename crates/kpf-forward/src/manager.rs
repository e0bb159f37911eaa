//! Forward session manager
//!
//! The table is guarded by a single reader/writer lock that is held only for
//! the mutation itself. Every start registers a pending entry up front and
//! re-checks its session id before each later write, so a `stop` that lands
//! while the start is waiting on the network always wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kpf_core::{Discovery, ForwardError, ForwardState, SessionKey, TunnelProvider, TunnelSignals};

use crate::allocator;
use crate::session::{ForwardSession, SessionId, SessionInfo};

/// Upper bound on a tunnel becoming ready
pub const DEFAULT_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);

type SessionTable = Arc<RwLock<HashMap<SessionKey, ForwardSession>>>;

/// Session id, its token and any failed entry it displaced
type Reservation = (SessionId, CancellationToken, Option<ForwardSession>);

/// Owns every forward session for one cluster connection
pub struct ForwardManager {
    discovery: Arc<dyn Discovery>,
    provider: Arc<dyn TunnelProvider>,
    sessions: SessionTable,
    next_session_id: AtomicU64,
    establish_timeout: Duration,
}

impl ForwardManager {
    /// Create a manager over the given collaborators
    pub fn new(discovery: Arc<dyn Discovery>, provider: Arc<dyn TunnelProvider>) -> Self {
        Self {
            discovery,
            provider,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_session_id: AtomicU64::new(1),
            establish_timeout: DEFAULT_ESTABLISH_TIMEOUT,
        }
    }

    /// Builder: override the readiness timeout
    pub fn with_establish_timeout(mut self, timeout: Duration) -> Self {
        self.establish_timeout = timeout;
        self
    }

    /// Discovery backend shared with the view refresh
    pub fn discovery(&self) -> Arc<dyn Discovery> {
        Arc::clone(&self.discovery)
    }

    /// Start forwarding `key`, returning the local port once the tunnel is ready.
    ///
    /// `preferred_local_port` is used as-is or the start fails with
    /// [`ForwardError::PortInUse`]; without it an ephemeral port is chosen.
    pub async fn start(
        &self,
        key: SessionKey,
        preferred_local_port: Option<u16>,
    ) -> Result<u16, ForwardError> {
        self.start_with_cancel(key, preferred_local_port, CancellationToken::new())
            .await
    }

    /// [`start`](Self::start) that also gives up when `cancel` fires.
    ///
    /// A caller cancellation is recorded on the session as a failure.
    pub async fn start_with_cancel(
        &self,
        key: SessionKey,
        preferred_local_port: Option<u16>,
        cancel: CancellationToken,
    ) -> Result<u16, ForwardError> {
        let (id, token, displaced) = self.reserve(&key)?;
        info!("Starting forward {} (session {})", key, id);

        let outcome = self
            .establish(&key, id, preferred_local_port, &token, &cancel)
            .await;

        match outcome {
            Ok((local_port, exited)) => {
                let activated = self.update(&key, id, |session| {
                    session.state = ForwardState::Active;
                });
                if !activated {
                    token.cancel();
                    debug!("Forward {} was stopped before it became active", key);
                    return Err(ForwardError::Cancelled);
                }

                info!("Forward {} active on 127.0.0.1:{}", key, local_port);
                self.spawn_exit_monitor(key, id, exited, token);
                Ok(local_port)
            }
            Err(err) => {
                token.cancel();
                self.record_failure(&key, id, &err, displaced);
                Err(err)
            }
        }
    }

    /// Stop a forward. Returns whether a session existed.
    ///
    /// The tunnel is signalled to shut down; this does not wait for it.
    pub fn stop(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.write().remove(key);
        match removed {
            Some(session) => {
                session.cancel.cancel();
                info!("Stopped forward {} ({})", key, session.state);
                true
            }
            None => false,
        }
    }

    /// Stop every forward, returning how many were tracked
    pub fn stop_all(&self) -> usize {
        let drained: Vec<ForwardSession> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in &drained {
            session.cancel.cancel();
        }
        if !drained.is_empty() {
            info!("Stopped {} forward(s)", drained.len());
        }
        drained.len()
    }

    /// Whether `key` has an active tunnel
    pub fn is_forwarding(&self, key: &SessionKey) -> bool {
        self.state_of(key) == ForwardState::Active
    }

    /// State of `key` (`Inactive` when untracked)
    pub fn state_of(&self, key: &SessionKey) -> ForwardState {
        self.sessions
            .read()
            .get(key)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Local port of an active forward
    pub fn local_port_of(&self, key: &SessionKey) -> Option<u16> {
        self.sessions
            .read()
            .get(key)
            .filter(|s| s.state == ForwardState::Active)
            .and_then(|s| s.local_port)
    }

    pub fn session(&self, key: &SessionKey) -> Option<SessionInfo> {
        self.sessions.read().get(key).map(ForwardSession::info)
    }

    /// Sessions for every port of one service, ordered by remote port
    pub fn sessions_for_service(&self, namespace: &str, service: &str) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.key.is_service(namespace, service))
            .map(ForwardSession::info)
            .collect();
        infos.sort_by_key(|info| info.key.remote_port);
        infos
    }

    /// Whether any port of the service is actively forwarded
    pub fn is_service_forwarding(&self, namespace: &str, service: &str) -> bool {
        self.sessions
            .read()
            .values()
            .any(|s| s.key.is_service(namespace, service) && s.state == ForwardState::Active)
    }

    /// Copy of every tracked session, ordered by key
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .values()
            .map(ForwardSession::info)
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Number of tracked sessions (any state)
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn allocate_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert a pending entry for `key`.
    ///
    /// A failed entry is displaced and handed back so it can be restored if
    /// the new attempt is rejected without being recorded.
    fn reserve(&self, key: &SessionKey) -> Result<Reservation, ForwardError> {
        let mut sessions = self.sessions.write();

        if let Some(existing) = sessions.get(key) {
            if existing.is_live() {
                return Err(ForwardError::AlreadyActive(key.clone()));
            }
            debug!("Displacing failed session {} for {}", existing.id, key);
            existing.cancel.cancel();
        }

        let id = self.allocate_session_id();
        let session = ForwardSession::pending(id, key.clone());
        let token = session.cancel.clone();
        let displaced = sessions.insert(key.clone(), session);
        Ok((id, token, displaced))
    }

    /// Resolve, allocate and wait for readiness. Never holds the lock across an await.
    async fn establish(
        &self,
        key: &SessionKey,
        id: SessionId,
        preferred_local_port: Option<u16>,
        token: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<(u16, oneshot::Receiver<String>), ForwardError> {
        let target = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ForwardError::Cancelled),
            _ = cancel.cancelled() => return Err(ForwardError::Cancelled),
            resolved = self.discovery.resolve_endpoint(&key.namespace, &key.service) => resolved?,
        };
        debug!("Resolved {} to pod {}", key, target);

        let local_port = match preferred_local_port {
            Some(port) if allocator::is_available(port) => port,
            Some(port) => return Err(ForwardError::PortInUse(port)),
            None => allocator::allocate_ephemeral()
                .map_err(|e| ForwardError::AllocationFailed(e.to_string()))?,
        };

        let recorded = self.update(key, id, |session| {
            session.local_port = Some(local_port);
        });
        if !recorded {
            return Err(ForwardError::Cancelled);
        }

        let remote_port = target.container_port(key.remote_port);
        debug!(
            "Establishing tunnel 127.0.0.1:{} -> {}:{}",
            local_port, target, remote_port
        );
        let TunnelSignals { ready, exited } =
            self.provider
                .establish(target, local_port, remote_port, token.clone());

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ForwardError::Cancelled),
            _ = cancel.cancelled() => Err(ForwardError::Cancelled),
            outcome = ready => match outcome {
                Ok(Ok(())) => Ok((local_port, exited)),
                Ok(Err(err)) => Err(ForwardError::EstablishFailed(err.to_string())),
                Err(_) => Err(ForwardError::EstablishFailed(
                    "tunnel worker exited before becoming ready".to_string(),
                )),
            },
            _ = tokio::time::sleep(self.establish_timeout) => {
                Err(ForwardError::EstablishTimeout(self.establish_timeout))
            }
        }
    }

    /// Apply `f` if the entry for `key` still belongs to session `id`
    fn update<F>(&self, key: &SessionKey, id: SessionId, f: F) -> bool
    where
        F: FnOnce(&mut ForwardSession),
    {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(key) {
            Some(session) if session.id == id => {
                f(session);
                true
            }
            _ => false,
        }
    }

    fn record_failure(
        &self,
        key: &SessionKey,
        id: SessionId,
        err: &ForwardError,
        displaced: Option<ForwardSession>,
    ) {
        if !err.is_recorded() {
            let mut sessions = self.sessions.write();
            if sessions.get(key).is_some_and(|s| s.id == id) {
                match displaced {
                    Some(previous) => {
                        debug!("Restoring failed session {} for {}", previous.id, key);
                        sessions.insert(key.clone(), previous);
                    }
                    None => {
                        sessions.remove(key);
                    }
                }
            }
            debug!("Start of {} rejected: {}", key, err);
            return;
        }

        if self.update(key, id, |session| session.fail(err.clone())) {
            warn!("Forward {} failed: {}", key, err);
        } else {
            debug!("Discarding outcome for stopped forward {}: {}", key, err);
        }
    }

    /// Mark the session failed if its tunnel exits on its own
    fn spawn_exit_monitor(
        &self,
        key: SessionKey,
        id: SessionId,
        exited: oneshot::Receiver<String>,
        token: CancellationToken,
    ) {
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let reason = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                exited = exited => match exited {
                    Ok(reason) => reason,
                    Err(_) if token.is_cancelled() => return,
                    Err(_) => "tunnel worker stopped".to_string(),
                },
            };

            let mut sessions = sessions.write();
            if let Some(session) = sessions.get_mut(&key) {
                if session.id == id && session.state == ForwardState::Active {
                    warn!("Forward {} closed: {}", key, reason);
                    session.fail(ForwardError::EstablishFailed(format!(
                        "tunnel closed: {}",
                        reason
                    )));
                }
            }
        });
    }
}
