//! Concurrent start/stop tests
//!
//! Hammers one manager from many tasks and checks that the table never holds
//! more than one session per key and that no tunnel outlives its session.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use kpf_core::{ForwardError, ForwardState, PortRecord, ServiceRecord, SessionKey};
use kpf_forward::testing::{FakeDiscovery, FakeTunnel, TunnelBehavior};
use kpf_forward::ForwardManager;

fn service(name: &str) -> ServiceRecord {
    ServiceRecord::new("web", name)
        .with_port(PortRecord::tcp("http", 80))
        .with_port(PortRecord::tcp("metrics", 9090))
}

fn create_manager(behavior: TunnelBehavior) -> (Arc<ForwardManager>, Arc<FakeTunnel>) {
    let discovery = Arc::new(
        FakeDiscovery::new()
            .with_service(service("frontend"))
            .with_service(service("backend")),
    );
    discovery.set_resolve_delay(Duration::from_millis(1));
    let tunnel = Arc::new(FakeTunnel::new(behavior));
    let manager = Arc::new(ForwardManager::new(discovery, tunnel.clone()));
    (manager, tunnel)
}

fn keys() -> Vec<SessionKey> {
    let mut keys = Vec::new();
    for name in ["frontend", "backend"] {
        for port in [80, 9090] {
            keys.push(SessionKey::new("web", name, port));
        }
    }
    keys
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_stop_keeps_one_session_per_key() {
    let (manager, tunnel) = create_manager(TunnelBehavior::ReadyAfter(Duration::from_millis(2)));
    let keys = keys();

    let mut tasks = Vec::new();
    for round in 0..50usize {
        let key = keys[round % keys.len()].clone();
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            if round % 3 == 0 {
                manager.stop(&key);
                Ok(0)
            } else {
                manager.start(key, None).await
            }
        }));
    }

    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) | Err(ForwardError::AlreadyActive(_)) | Err(ForwardError::Cancelled) => {}
            Err(other) => panic!("unexpected start error: {other}"),
        }
    }

    let snapshot = manager.snapshot();
    let unique: HashSet<_> = snapshot.iter().map(|s| s.key.clone()).collect();
    assert_eq!(unique.len(), snapshot.len());
    assert!(snapshot.len() <= keys.len());

    // Every surviving tunnel belongs to an active session
    let active = snapshot
        .iter()
        .filter(|s| s.state == ForwardState::Active)
        .count();
    assert_eq!(tunnel.live_count(), active);

    manager.stop_all();
    assert_eq!(tunnel.live_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rapid_double_start_never_double_allocates() {
    let (manager, tunnel) = create_manager(TunnelBehavior::Ready);
    let key = SessionKey::new("web", "frontend", 80);

    let starts = (0..8).map(|_| {
        let manager = Arc::clone(&manager);
        let key = key.clone();
        tokio::spawn(async move { manager.start(key, None).await })
    });
    let results: Vec<_> = join_all(starts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let started = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ForwardError::AlreadyActive(_))))
        .count();
    assert_eq!(started, 1);
    assert_eq!(rejected, 7);
    assert_eq!(tunnel.establishments().len(), 1);
    assert_eq!(manager.len(), 1);
}
