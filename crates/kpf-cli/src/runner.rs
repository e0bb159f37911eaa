//! Terminal ownership and the event loop
//!
//! The loop runs on one task and selects over terminal input, command
//! results and the refresh interval. Commands that wait on the cluster run
//! on spawned tasks and report back through the message channel, so a slow
//! start never blocks rendering.

use std::io::{self, Stdout};
use std::panic;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use kpf_core::config::KpfConfig;
use kpf_core::SessionKey;
use kpf_forward::{ForwardManager, SessionInfo};

use crate::app::{App, ClusterInfo, Command, Message};
use crate::ui;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Raw-mode terminal on the alternate screen, restored on drop
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    restored: bool,
}

impl Tui {
    pub fn new() -> io::Result<Self> {
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(move |panic_info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
            original_hook(panic_info);
        }));

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        debug!("Terminal initialized");
        Ok(Self {
            terminal,
            restored: false,
        })
    }

    pub fn restore(&mut self) -> io::Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        debug!("Terminal restored");
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("Failed to restore terminal: {}", e);
        }
    }
}

/// Executes [`Command`]s against the forward manager
pub struct Dispatcher {
    manager: Arc<ForwardManager>,
    namespace: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

impl Dispatcher {
    pub fn new(
        manager: Arc<ForwardManager>,
        namespace: Option<String>,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            manager,
            namespace,
            tx,
        }
    }

    /// Run one command. Returns false when the loop should exit.
    ///
    /// Loading and starting are spawned; stop and sync only touch the
    /// session table and answer immediately.
    pub fn dispatch(&self, cmd: Command) -> bool {
        match cmd {
            Command::Quit => return false,
            Command::LoadServices => self.spawn_load(),
            Command::SyncSessions => self.send(Message::SessionsSynced(self.manager.snapshot())),
            Command::StartForward { key, preferred }
            | Command::RestartForward { key, preferred } => self.spawn_start(key, preferred),
            Command::StopForward(key) => {
                if !self.manager.stop(&key) {
                    debug!("Stop for {} found no session", key);
                }
                self.send(Message::ForwardStopped(key));
            }
        }
        true
    }

    fn send(&self, msg: Message) {
        if self.tx.send(msg).is_err() {
            debug!("Event loop gone, dropping message");
        }
    }

    fn spawn_load(&self) {
        let manager = Arc::clone(&self.manager);
        let namespace = self.namespace.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let discovery = manager.discovery();
            let msg = match discovery.list_services(namespace.as_deref()).await {
                Ok(services) => Message::ServicesLoaded {
                    services,
                    sessions: manager.snapshot(),
                },
                Err(e) => {
                    warn!("Failed to list services: {}", e);
                    Message::LoadFailed(e.to_string())
                }
            };
            let _ = tx.send(msg);
        });
    }

    /// A failed entry for `key` is replaced by the manager on start
    fn spawn_start(&self, key: SessionKey, preferred: Option<u16>) {
        let manager = Arc::clone(&self.manager);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let msg = match manager.start(key.clone(), preferred).await {
                Ok(local_port) => Message::ForwardStarted { key, local_port },
                Err(error) => Message::ForwardFailed { key, error },
            };
            let _ = tx.send(msg);
        });
    }
}

/// Own the terminal and run the TUI until the user quits.
///
/// Every session is stopped before returning; the returned snapshot is the
/// session table as it was at exit.
pub async fn run(
    manager: Arc<ForwardManager>,
    config: &KpfConfig,
    cluster: ClusterInfo,
) -> Result<Vec<SessionInfo>> {
    let mut tui = Tui::new().context("Failed to initialize terminal")?;
    let result = event_loop(&mut tui, Arc::clone(&manager), config, cluster).await;

    let sessions = manager.snapshot();
    let stopped = manager.stop_all();
    if stopped > 0 {
        info!("Stopped {} forwards on exit", stopped);
    }
    tui.restore().context("Failed to restore terminal")?;
    result.map(|()| sessions)
}

async fn event_loop(
    tui: &mut Tui,
    manager: Arc<ForwardManager>,
    config: &KpfConfig,
    cluster: ClusterInfo,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(manager, config.namespace.clone(), tx);
    let mut app = App::new(config);

    let size = tui.terminal.size()?;
    app.update(Message::Resize {
        width: size.width,
        height: size.height,
    });
    app.update(Message::ClusterInfo(cluster));
    dispatcher.dispatch(Command::LoadServices);

    let mut events = EventStream::new();
    let mut refresh = tokio::time::interval(config.refresh_interval.max(MIN_REFRESH_INTERVAL));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tui.terminal.draw(|frame| ui::render(frame, &app))?;

        let msg = tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => Message::Key(key),
                Some(Ok(Event::Resize(width, height))) => Message::Resize { width, height },
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e).context("Failed to read terminal events"),
                None => return Ok(()),
            },
            Some(msg) = rx.recv() => msg,
            _ = refresh.tick() => Message::Tick,
        };

        if let Some(cmd) = app.update(msg) {
            if !dispatcher.dispatch(cmd) {
                debug!("Quit requested");
                return Ok(());
            }
        }
    }
}
