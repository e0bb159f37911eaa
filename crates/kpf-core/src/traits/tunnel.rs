//! Tunnel provider traits

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::TunnelError;
use crate::types::PodTarget;

/// Signals returned by [`TunnelProvider::establish`].
///
/// `ready` fires once: `Ok` when traffic can flow, `Err` when the tunnel
/// could not be set up. `exited` fires if the forwarding worker stops on its
/// own after becoming ready. Both senders being dropped without a value
/// means the worker went away.
pub struct TunnelSignals {
    /// Readiness outcome
    pub ready: oneshot::Receiver<Result<(), TunnelError>>,
    /// Unexpected termination after readiness
    pub exited: oneshot::Receiver<String>,
}

/// Sending half of [`TunnelSignals`], held by the tunnel worker
pub struct TunnelNotifier {
    ready: Option<oneshot::Sender<Result<(), TunnelError>>>,
    exited: Option<oneshot::Sender<String>>,
}

impl TunnelSignals {
    /// Create a connected notifier/signals pair
    pub fn channel() -> (TunnelNotifier, TunnelSignals) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = oneshot::channel();
        (
            TunnelNotifier {
                ready: Some(ready_tx),
                exited: Some(exited_tx),
            },
            TunnelSignals {
                ready: ready_rx,
                exited: exited_rx,
            },
        )
    }
}

impl TunnelNotifier {
    /// Report readiness. Only the first call has an effect.
    pub fn ready(&mut self) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Report a setup failure. Ignored once readiness was reported.
    pub fn failed(&mut self, err: TunnelError) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(Err(err));
        }
    }

    /// Report that the worker stopped on its own.
    ///
    /// Before readiness this is a setup failure; afterwards it fires `exited`.
    pub fn exited(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.ready.is_some() {
            self.failed(TunnelError::Upstream(reason));
        } else if let Some(tx) = self.exited.take() {
            let _ = tx.send(reason);
        }
    }
}

/// Opaque capability to establish a local-to-pod tunnel.
///
/// Implementations run the forwarding work on their own task and stop it
/// when `cancel` fires. `establish` must not block.
pub trait TunnelProvider: Send + Sync {
    /// Start forwarding `local_port` to `remote_port` on `target`
    fn establish(
        &self,
        target: PodTarget,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationToken,
    ) -> TunnelSignals;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier_ready_is_single_fire() {
        let (mut notifier, signals) = TunnelSignals::channel();
        notifier.ready();
        notifier.failed(TunnelError::Upstream("late".into()));
        assert_eq!(signals.ready.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_notifier_exit_before_ready_is_failure() {
        let (mut notifier, signals) = TunnelSignals::channel();
        notifier.exited("connection refused");
        assert_eq!(
            signals.ready.await.unwrap(),
            Err(TunnelError::Upstream("connection refused".into()))
        );
    }

    #[tokio::test]
    async fn test_notifier_exit_after_ready() {
        let (mut notifier, signals) = TunnelSignals::channel();
        notifier.ready();
        notifier.exited("pod deleted");
        assert_eq!(signals.ready.await.unwrap(), Ok(()));
        assert_eq!(signals.exited.await.unwrap(), "pod deleted");
    }
}
