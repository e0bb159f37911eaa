//! Forward session records

use std::time::SystemTime;

use kpf_core::{ForwardError, ForwardState, SessionKey};
use tokio_util::sync::CancellationToken;

/// Identity of one start attempt; never reused within a manager
pub(crate) type SessionId = u64;

/// A tracked forward. Lives only inside the manager's table.
pub(crate) struct ForwardSession {
    pub id: SessionId,
    pub key: SessionKey,
    pub state: ForwardState,
    pub local_port: Option<u16>,
    pub started_at: SystemTime,
    pub failure: Option<SessionFailure>,
    pub cancel: CancellationToken,
}

impl ForwardSession {
    /// New pending session holding a fresh cancellation token
    pub fn pending(id: SessionId, key: SessionKey) -> Self {
        Self {
            id,
            key,
            state: ForwardState::Pending,
            local_port: None,
            started_at: SystemTime::now(),
            failure: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether this entry blocks a new start for the same key
    pub fn is_live(&self) -> bool {
        matches!(self.state, ForwardState::Pending | ForwardState::Active)
    }

    pub fn fail(&mut self, error: ForwardError) {
        self.state = ForwardState::Failed;
        self.failure = Some(SessionFailure {
            error,
            at: SystemTime::now(),
        });
        self.cancel.cancel();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            key: self.key.clone(),
            state: self.state,
            local_port: self.local_port,
            started_at: self.started_at,
            failure: self.failure.clone(),
        }
    }
}

/// Why and when a session failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    /// Failure reason
    pub error: ForwardError,
    /// When the failure was recorded
    pub at: SystemTime,
}

/// Read-only copy of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Start attempt identity
    pub id: u64,
    /// Session key
    pub key: SessionKey,
    /// Lifecycle state
    pub state: ForwardState,
    /// Local port, once resolved
    pub local_port: Option<u16>,
    /// When the start was requested
    pub started_at: SystemTime,
    /// Failure details (failed sessions only)
    pub failure: Option<SessionFailure>,
}

impl SessionInfo {
    pub fn is_active(&self) -> bool {
        self.state == ForwardState::Active
    }

    /// Failure reason as display text
    pub fn failure_reason(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.error.to_string())
    }
}
