//! Event loop tests without a terminal
//!
//! Drives `App` and `Dispatcher` the way the runner does, with scripted
//! discovery and tunnels standing in for the cluster.

use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;

use kpf::app::{App, Message, View};
use kpf::runner::Dispatcher;
use kpf_core::config::KpfConfig;
use kpf_core::{ForwardState, PortRecord, ServiceRecord, SessionKey};
use kpf_forward::allocator::allocate_ephemeral;
use kpf_forward::testing::{FakeDiscovery, FakeTunnel, TunnelBehavior};
use kpf_forward::ForwardManager;

struct Harness {
    app: App,
    dispatcher: Dispatcher,
    rx: mpsc::UnboundedReceiver<Message>,
    manager: Arc<ForwardManager>,
    discovery: Arc<FakeDiscovery>,
    tunnel: Arc<FakeTunnel>,
}

impl Harness {
    fn new(services: Vec<ServiceRecord>, config: KpfConfig) -> Self {
        let discovery = Arc::new(FakeDiscovery::new());
        discovery.set_services(services);
        let tunnel = Arc::new(FakeTunnel::new(TunnelBehavior::Ready));
        let manager = Arc::new(ForwardManager::new(discovery.clone(), tunnel.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(Arc::clone(&manager), config.namespace.clone(), tx);
        let mut app = App::new(&config);
        app.update(Message::Resize {
            width: 120,
            height: 40,
        });

        Self {
            app,
            dispatcher,
            rx,
            manager,
            discovery,
            tunnel,
        }
    }

    /// Feed one message and dispatch whatever command it produces
    fn send(&mut self, msg: Message) {
        if let Some(cmd) = self.app.update(msg) {
            assert!(self.dispatcher.dispatch(cmd));
        }
    }

    fn key(&mut self, code: KeyCode) {
        self.send(Message::Key(KeyEvent::new(code, KeyModifiers::NONE)));
    }

    fn type_text(&mut self, text: &str) {
        for c in text.chars() {
            self.key(KeyCode::Char(c));
        }
    }

    /// Deliver the next completion message
    async fn pump(&mut self) {
        let msg = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a completion")
            .expect("channel closed");
        self.send(msg);
    }

    async fn load(&mut self) {
        self.send(Message::Key(KeyEvent::new(
            KeyCode::Char('r'),
            KeyModifiers::NONE,
        )));
        self.pump().await;
    }

    fn state(&self, key: &SessionKey) -> ForwardState {
        self.app.table().find(key).expect("row exists").state()
    }
}

fn frontend(port: u16) -> ServiceRecord {
    ServiceRecord::new("web", "frontend").with_port(PortRecord::tcp("http", port))
}

fn ephemeral_config() -> KpfConfig {
    KpfConfig {
        prefer_service_port: false,
        ..KpfConfig::default()
    }
}

#[tokio::test]
async fn test_toggle_starts_and_stops_forward() {
    let mut h = Harness::new(vec![frontend(80)], ephemeral_config());
    let key = SessionKey::new("web", "frontend", 80);
    h.load().await;
    assert_eq!(h.app.table().len(), 1);

    h.key(KeyCode::Char('f'));
    assert_eq!(h.state(&key), ForwardState::Pending);

    h.pump().await;
    assert_eq!(h.state(&key), ForwardState::Active);
    let row = h.app.table().find(&key).unwrap();
    assert_eq!(row.active_local_port(), h.manager.local_port_of(&key));

    h.key(KeyCode::Char('f'));
    h.pump().await;
    assert_eq!(h.state(&key), ForwardState::Inactive);
    assert!(h.manager.is_empty());
    assert_eq!(h.tunnel.live_count(), 0);
}

#[tokio::test]
async fn test_port_conflict_prompts_for_another_port() {
    let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let busy = held.local_addr().unwrap().port();
    let mut h = Harness::new(vec![frontend(busy)], KpfConfig::default());
    let key = SessionKey::new("web", "frontend", busy);
    h.load().await;

    h.key(KeyCode::Char('f'));
    h.pump().await;
    h.pump().await;
    assert_eq!(h.app.view(), View::PortPrompt);
    assert_eq!(h.app.prompt().unwrap().conflict, Some(busy));
    assert_eq!(h.state(&key), ForwardState::Inactive);
    assert!(h.manager.is_empty());

    let free = allocate_ephemeral().unwrap();
    h.type_text(&free.to_string());
    h.key(KeyCode::Enter);
    h.pump().await;

    assert_eq!(h.state(&key), ForwardState::Active);
    assert_eq!(h.manager.local_port_of(&key), Some(free));
    drop(held);
}

#[tokio::test]
async fn test_failed_forward_restarts() {
    let mut h = Harness::new(vec![frontend(80)], ephemeral_config());
    let key = SessionKey::new("web", "frontend", 80);
    h.tunnel.set_behavior(TunnelBehavior::FailAfter(
        Duration::from_millis(5),
        "pod refused".into(),
    ));
    h.load().await;

    h.key(KeyCode::Char('f'));
    h.pump().await;
    assert_eq!(h.state(&key), ForwardState::Failed);
    let reason = h.app.table().find(&key).unwrap().session.failure.clone();
    assert!(reason.unwrap().contains("pod refused"));

    h.tunnel.set_behavior(TunnelBehavior::Ready);
    h.key(KeyCode::Char('f'));
    assert_eq!(h.state(&key), ForwardState::Pending);
    h.pump().await;
    assert_eq!(h.state(&key), ForwardState::Active);
    assert_eq!(h.manager.len(), 1);
}

#[tokio::test]
async fn test_port_conflict_on_restart_keeps_failure() {
    let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let busy = held.local_addr().unwrap().port();
    let mut h = Harness::new(vec![frontend(busy)], KpfConfig::default());
    let key = SessionKey::new("web", "frontend", busy);
    h.tunnel.set_behavior(TunnelBehavior::FailAfter(
        Duration::from_millis(5),
        "pod refused".into(),
    ));
    h.load().await;

    // Conflict on the service port, then a failure on the chosen port
    h.key(KeyCode::Char('f'));
    h.pump().await;
    h.pump().await;
    let free = allocate_ephemeral().unwrap();
    h.type_text(&free.to_string());
    h.key(KeyCode::Enter);
    h.pump().await;
    assert_eq!(h.state(&key), ForwardState::Failed);

    h.tunnel.set_behavior(TunnelBehavior::Ready);
    h.key(KeyCode::Char('f'));
    assert_eq!(h.state(&key), ForwardState::Pending);
    h.pump().await;
    assert_eq!(h.app.view(), View::PortPrompt);
    h.pump().await;

    assert_eq!(h.state(&key), ForwardState::Failed);
    let reason = h.app.table().find(&key).unwrap().session.failure.clone();
    assert!(reason.unwrap().contains("pod refused"));
    assert_eq!(h.manager.state_of(&key), ForwardState::Failed);
    assert_eq!(h.tunnel.establishments().len(), 1);
    drop(held);
}

#[tokio::test]
async fn test_result_for_removed_service_is_dropped() {
    let mut h = Harness::new(
        vec![frontend(80), ServiceRecord::new("web", "headless")],
        ephemeral_config(),
    );
    let key = SessionKey::new("web", "frontend", 80);
    h.tunnel
        .set_behavior(TunnelBehavior::ReadyAfter(Duration::from_millis(200)));
    h.load().await;

    h.key(KeyCode::Char('f'));
    h.discovery
        .set_services(vec![ServiceRecord::new("web", "headless")]);
    h.load().await;
    assert!(h.app.table().find(&key).is_none());

    // The start completes after its row is gone
    h.pump().await;
    assert_eq!(h.app.table().active_forward_count(), 0);
    assert_eq!(h.app.table().total_rows(), 1);
    assert!(h.manager.is_forwarding(&key));
}

#[tokio::test]
async fn test_tick_syncs_manager_state() {
    let mut h = Harness::new(vec![frontend(80)], ephemeral_config());
    let key = SessionKey::new("web", "frontend", 80);
    h.load().await;

    let port = h.manager.start(key.clone(), None).await.unwrap();
    h.send(Message::Tick);
    h.pump().await;
    assert_eq!(h.state(&key), ForwardState::Active);
    assert_eq!(
        h.app.table().find(&key).unwrap().active_local_port(),
        Some(port)
    );

    h.manager.stop(&key);
    h.send(Message::Tick);
    h.pump().await;
    assert_eq!(h.state(&key), ForwardState::Inactive);
}

#[tokio::test]
async fn test_load_failure_opens_error_modal() {
    let mut h = Harness::new(vec![frontend(80)], ephemeral_config());
    h.discovery.set_list_error(Some(kpf_core::DiscoveryError::Api(
        "services is forbidden".into(),
    )));

    h.load().await;
    assert_eq!(h.app.view(), View::Error);
    assert!(h.app.error().unwrap().contains("forbidden"));
}
