//! TUI state machine
//!
//! [`App::update`] consumes one [`Message`] at a time and returns at most one
//! [`Command`] for the runner to execute. It never touches the forward
//! manager directly; results come back as messages addressed by
//! [`SessionKey`].

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use kpf_core::config::KpfConfig;
use kpf_core::{ForwardError, ForwardState, ServiceRecord, SessionKey};
use kpf_forward::SessionInfo;

use crate::table::{ServiceTable, SortField, FILTER_TYPES};

/// Terminal rows used by everything except the table body
pub const CHROME_HEIGHT: u16 = 8;

/// Lowest port accepted from the port prompt
pub const MIN_PROMPT_PORT: u16 = 1024;

/// Digits accepted by the port prompt
const MAX_PORT_DIGITS: usize = 5;

/// Active screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    List,
    Detail,
    Help,
    PortPrompt,
    Error,
    Filter,
}

/// Input to [`App::update`]
#[derive(Debug)]
pub enum Message {
    Key(KeyEvent),
    Resize { width: u16, height: u16 },
    /// Refresh interval elapsed
    Tick,
    ServicesLoaded {
        services: Vec<ServiceRecord>,
        sessions: Vec<SessionInfo>,
    },
    LoadFailed(String),
    SessionsSynced(Vec<SessionInfo>),
    ForwardStarted { key: SessionKey, local_port: u16 },
    ForwardFailed { key: SessionKey, error: ForwardError },
    ForwardStopped(SessionKey),
    ClusterInfo(ClusterInfo),
}

/// Work requested from the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LoadServices,
    SyncSessions,
    StartForward {
        key: SessionKey,
        preferred: Option<u16>,
    },
    StopForward(SessionKey),
    /// Clear a failed session and start again
    RestartForward {
        key: SessionKey,
        preferred: Option<u16>,
    },
    Quit,
}

/// Cluster details shown in the header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub host: String,
    pub config_source: String,
    pub version: String,
}

/// Local port entry after the preferred port was taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPrompt {
    pub key: SessionKey,
    /// Port that was already in use
    pub conflict: Option<u16>,
    pub input: String,
}

/// Filter editor state
#[derive(Debug, Clone, Default)]
pub struct FilterEditor {
    type_index: usize,
    pub input: String,
    /// Text typed before tab completion started
    prefix: String,
    completion: Option<usize>,
}

impl FilterEditor {
    pub fn filter_type(&self) -> &'static str {
        FILTER_TYPES[self.type_index % FILTER_TYPES.len()]
    }

    fn cycle(&mut self, forward: bool) {
        let len = FILTER_TYPES.len();
        self.type_index = if forward {
            (self.type_index + 1) % len
        } else {
            (self.type_index + len - 1) % len
        };
        self.set_input(String::new());
    }

    fn set_input(&mut self, input: String) {
        self.prefix = input.clone();
        self.input = input;
        self.completion = None;
    }

    fn complete(&mut self, suggestions: &[String]) {
        let prefix = self.prefix.to_lowercase();
        let matches: Vec<&String> = suggestions
            .iter()
            .filter(|s| s.to_lowercase().starts_with(&prefix))
            .collect();
        if matches.is_empty() {
            return;
        }
        let next = self.completion.map_or(0, |i| (i + 1) % matches.len());
        self.completion = Some(next);
        self.input = matches[next].clone();
    }
}

/// TUI state
pub struct App {
    table: ServiceTable,
    view: View,
    previous_view: View,
    namespace: String,
    prefer_service_port: bool,
    page_size: usize,
    cluster: Option<ClusterInfo>,
    status: Option<String>,
    error: Option<String>,
    prompt: Option<PortPrompt>,
    filter: FilterEditor,
    loading: bool,
    should_quit: bool,
}

impl App {
    pub fn new(config: &KpfConfig) -> Self {
        let mut table = ServiceTable::new();
        let sort = SortField::parse(&config.default_sort).unwrap_or(SortField::Namespace);
        table.sort_by(sort, true);

        Self {
            table,
            view: View::List,
            previous_view: View::List,
            namespace: config.namespace_label().to_string(),
            prefer_service_port: config.prefer_service_port,
            page_size: config.page_size.max(1),
            cluster: None,
            status: None,
            error: None,
            prompt: None,
            filter: FilterEditor::default(),
            loading: true,
            should_quit: false,
        }
    }

    pub fn update(&mut self, msg: Message) -> Option<Command> {
        match msg {
            Message::Key(key) => self.handle_key(key),
            Message::Resize { height, .. } => {
                let rows = height.saturating_sub(CHROME_HEIGHT).max(1);
                self.table.set_viewport(rows as usize);
                None
            }
            Message::Tick => Some(Command::SyncSessions),
            Message::ServicesLoaded { services, sessions } => {
                self.loading = false;
                self.table.sync_sessions(&sessions);
                self.table.set_records(&services);
                tracing::debug!(
                    "Loaded {} services ({} rows)",
                    services.len(),
                    self.table.total_rows()
                );
                None
            }
            Message::LoadFailed(reason) => {
                self.loading = false;
                self.show_error(format!("Failed to load services: {}", reason));
                None
            }
            Message::SessionsSynced(sessions) => {
                self.table.sync_sessions(&sessions);
                None
            }
            Message::ForwardStarted { key, local_port } => {
                if self.table.mark_active(&key, local_port) {
                    self.status = Some(format!("Forwarding {} on localhost:{}", key, local_port));
                } else {
                    tracing::debug!("Dropping start result for vanished row {}", key);
                }
                None
            }
            Message::ForwardFailed { key, error } => self.forward_failed(key, error),
            Message::ForwardStopped(key) => {
                if self.table.mark_inactive(&key) {
                    self.status = Some(format!("Stopped {}", key));
                }
                None
            }
            Message::ClusterInfo(info) => {
                self.cluster = Some(info);
                None
            }
        }
    }

    fn forward_failed(&mut self, key: SessionKey, error: ForwardError) -> Option<Command> {
        match error {
            ForwardError::Cancelled => None,
            ForwardError::PortInUse(port) => {
                if !self.table.mark_inactive(&key) {
                    return None;
                }
                self.open_prompt(key, Some(port));
                // A failed session displaced by the attempt is still tracked
                Some(Command::SyncSessions)
            }
            ForwardError::AlreadyActive(_) => {
                self.status = Some(format!("{} is already forwarding", key));
                Some(Command::SyncSessions)
            }
            other => {
                let reason = other.to_string();
                if self.table.mark_failed(&key, reason.clone()) {
                    self.status = Some(format!("Forward {} failed: {}", key, reason));
                } else {
                    tracing::debug!("Dropping failure for vanished row {}", key);
                }
                None
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return self.quit();
        }

        match self.view {
            View::List => self.list_key(key),
            View::Detail => match key.code {
                KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('b') => {
                    self.view = View::List;
                    None
                }
                KeyCode::Char('f') | KeyCode::Char('F') => self.toggle_selected(),
                _ => None,
            },
            View::Help => {
                if matches!(
                    key.code,
                    KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('h')
                ) {
                    self.view = View::List;
                }
                None
            }
            View::PortPrompt => self.prompt_key(key),
            View::Error => {
                if matches!(
                    key.code,
                    KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') | KeyCode::Char('q')
                ) {
                    self.view = self.previous_view;
                    self.error = None;
                }
                None
            }
            View::Filter => self.filter_key(key),
        }
    }

    fn list_key(&mut self, key: KeyEvent) -> Option<Command> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let page = self.page_size as isize;

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return self.quit(),
            KeyCode::Up | KeyCode::Char('k') => self.table.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.table.move_selection(1),
            KeyCode::PageUp => self.table.move_selection(-page),
            KeyCode::Char('u') if ctrl => self.table.move_selection(-page),
            KeyCode::PageDown => self.table.move_selection(page),
            KeyCode::Char('d') if ctrl => self.table.move_selection(page),
            KeyCode::Home => self.table.move_to_start(),
            KeyCode::Char('a') if ctrl => self.table.move_to_start(),
            KeyCode::End => self.table.move_to_end(),
            KeyCode::Char('e') if ctrl => self.table.move_to_end(),
            KeyCode::Enter | KeyCode::Char('d') => {
                if self.table.selected_row().is_some() {
                    self.view = View::Detail;
                }
            }
            KeyCode::Char('f') | KeyCode::Char('F') => return self.toggle_selected(),
            KeyCode::Char('r') => {
                self.loading = true;
                self.status = Some("Refreshing services".to_string());
                return Some(Command::LoadServices);
            }
            KeyCode::Char('N') => self.sort(SortField::Namespace),
            KeyCode::Char('M') => self.sort(SortField::Name),
            KeyCode::Char('S') => self.sort(SortField::Status),
            KeyCode::Char('P') => self.sort(SortField::Ports),
            KeyCode::Char('L') => self.sort(SortField::LocalPort),
            KeyCode::Char('?') | KeyCode::Char('h') => self.view = View::Help,
            KeyCode::Char('/') => {
                self.filter = FilterEditor::default();
                let existing = self.table.filters().get(self.filter.filter_type()).cloned();
                self.filter.set_input(existing.unwrap_or_default());
                self.view = View::Filter;
            }
            _ => {}
        }
        None
    }

    fn prompt_key(&mut self, key: KeyEvent) -> Option<Command> {
        let prompt = self.prompt.as_mut()?;
        match key.code {
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if prompt.input.len() < MAX_PORT_DIGITS {
                    prompt.input.push(c);
                }
                None
            }
            KeyCode::Backspace => {
                prompt.input.pop();
                None
            }
            KeyCode::Esc | KeyCode::Char('q') => {
                self.prompt = None;
                self.view = View::List;
                None
            }
            KeyCode::Enter => self.submit_prompt(),
            _ => None,
        }
    }

    fn submit_prompt(&mut self) -> Option<Command> {
        let prompt = self.prompt.as_mut()?;
        let port = match prompt.input.parse::<u16>() {
            Ok(port) if port >= MIN_PROMPT_PORT => port,
            _ => {
                let message = format!(
                    "Invalid port '{}': enter a number between {} and 65535",
                    prompt.input, MIN_PROMPT_PORT
                );
                prompt.input.clear();
                self.show_error(message);
                return None;
            }
        };

        let key = prompt.key.clone();
        self.prompt = None;
        self.view = View::List;
        if !self.table.mark_pending(&key) {
            return None;
        }
        self.status = Some(format!("Starting {} on localhost:{}", key, port));
        Some(Command::StartForward {
            key,
            preferred: Some(port),
        })
    }

    fn filter_key(&mut self, key: KeyEvent) -> Option<Command> {
        match key.code {
            KeyCode::Enter => {
                let mut filters = self.table.filters().clone();
                let filter_type = self.filter.filter_type().to_string();
                let value = self.filter.input.trim().to_string();
                if value.is_empty() {
                    filters.remove(&filter_type);
                } else {
                    filters.insert(filter_type, value);
                }
                self.table.apply_filters(&filters);
                self.view = View::List;
            }
            KeyCode::Esc => self.view = View::List,
            KeyCode::Right => self.filter.cycle(true),
            KeyCode::Left => self.filter.cycle(false),
            KeyCode::Tab => {
                let suggestions = self.table.suggestions(self.filter.filter_type());
                self.filter.complete(&suggestions);
            }
            KeyCode::Char('C') => {
                self.table.apply_filters(&Default::default());
                self.view = View::List;
            }
            KeyCode::Backspace => {
                let mut input = self.filter.input.clone();
                input.pop();
                self.filter.set_input(input);
            }
            KeyCode::Char(c) => {
                let input = format!("{}{}", self.filter.input, c);
                self.filter.set_input(input);
            }
            _ => {}
        }
        None
    }

    fn toggle_selected(&mut self) -> Option<Command> {
        let (key, state) = {
            let row = self.table.selected_row()?;
            match row.session_key() {
                Some(key) => (key, row.state()),
                None => {
                    let message = format!("{}/{} has no ports to forward", row.namespace, row.name);
                    self.status = Some(message);
                    return None;
                }
            }
        };
        let preferred = self.prefer_service_port.then_some(key.remote_port);

        match state {
            ForwardState::Inactive => {
                self.table.mark_pending(&key);
                self.status = Some(format!("Starting {}", key));
                Some(Command::StartForward { key, preferred })
            }
            ForwardState::Pending | ForwardState::Active => {
                self.status = Some(format!("Stopping {}", key));
                Some(Command::StopForward(key))
            }
            ForwardState::Failed => {
                self.table.mark_pending(&key);
                self.status = Some(format!("Restarting {}", key));
                Some(Command::RestartForward { key, preferred })
            }
        }
    }

    fn sort(&mut self, field: SortField) {
        let ascending = match self.table.sort() {
            Some((current, ascending)) if current == field => !ascending,
            _ => true,
        };
        self.table.sort_by(field, ascending);
    }

    fn open_prompt(&mut self, key: SessionKey, conflict: Option<u16>) {
        self.status = conflict.map(|port| format!("Port {} is already in use", port));
        self.prompt = Some(PortPrompt {
            key,
            conflict,
            input: String::new(),
        });
        self.view = View::PortPrompt;
    }

    fn show_error(&mut self, message: String) {
        if self.view != View::Error {
            self.previous_view = self.view;
        }
        self.error = Some(message);
        self.view = View::Error;
    }

    fn quit(&mut self) -> Option<Command> {
        self.should_quit = true;
        Some(Command::Quit)
    }

    pub fn table(&self) -> &ServiceTable {
        &self.table
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// View shown underneath the error modal
    pub fn previous_view(&self) -> View {
        self.previous_view
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster(&self) -> Option<&ClusterInfo> {
        self.cluster.as_ref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn prompt(&self) -> Option<&PortPrompt> {
        self.prompt.as_ref()
    }

    pub fn filter_editor(&self) -> &FilterEditor {
        &self.filter
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }
}
