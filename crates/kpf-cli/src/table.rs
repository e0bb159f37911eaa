//! Row projection over the service list
//!
//! Services are expanded into one row per port (or a single placeholder row
//! for a service without ports). The rows are kept sorted; the active
//! sequence is the subset matching the current filters, in sort order. The
//! selection cursor and scroll window always refer to the active sequence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::SystemTime;

use kpf_core::{ForwardState, ServiceRecord, SessionKey};
use kpf_forward::SessionInfo;

/// Active filters, keyed by filter type
pub type Filters = BTreeMap<String, String>;

/// Filter types offered by the filter editor, in cycling order.
/// `search` (like any key without its own rule) matches every text column.
pub const FILTER_TYPES: [&str; 5] = ["search", "status", "type", "name", "protocol"];

/// Port name shown for services without ports
pub const PLACEHOLDER_PORT_NAME: &str = "<none>";

/// Identity of a row across rebuilds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub namespace: String,
    pub name: String,
    pub port: Option<u16>,
}

/// Forward state overlaid on a row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSession {
    pub state: ForwardState,
    pub local_port: Option<u16>,
    pub started_at: Option<SystemTime>,
    pub failure: Option<String>,
    pub failed_at: Option<SystemTime>,
}

impl From<&SessionInfo> for RowSession {
    fn from(info: &SessionInfo) -> Self {
        Self {
            state: info.state,
            local_port: info.local_port,
            started_at: Some(info.started_at),
            failure: info.failure_reason(),
            failed_at: info.failure.as_ref().map(|f| f.at),
        }
    }
}

/// One displayed row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRow {
    pub namespace: String,
    pub name: String,
    pub kind: String,
    pub cluster_ip: Option<String>,
    pub external_ip: Option<String>,
    pub port_name: String,
    pub port: Option<u16>,
    pub target_port: Option<u16>,
    pub protocol: String,
    pub created_at: Option<SystemTime>,
    pub session: RowSession,
}

impl DisplayRow {
    pub fn key(&self) -> RowKey {
        RowKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            port: self.port,
        }
    }

    /// Session key, `None` for a placeholder row
    pub fn session_key(&self) -> Option<SessionKey> {
        self.port
            .map(|port| SessionKey::new(&self.namespace, &self.name, port))
    }

    pub fn is_placeholder(&self) -> bool {
        self.port.is_none()
    }

    pub fn state(&self) -> ForwardState {
        self.session.state
    }

    /// Local port, shown only while active
    pub fn active_local_port(&self) -> Option<u16> {
        match self.session.state {
            ForwardState::Active => self.session.local_port,
            _ => None,
        }
    }

    fn text_fields(&self) -> [String; 8] {
        [
            self.namespace.clone(),
            self.name.clone(),
            self.kind.clone(),
            self.cluster_ip.clone().unwrap_or_default(),
            self.external_ip.clone().unwrap_or_default(),
            self.port_name.clone(),
            self.port.map(|p| p.to_string()).unwrap_or_default(),
            self.protocol.clone(),
        ]
    }

    fn matches(&self, filter: &str, value: &str) -> bool {
        let value = value.to_lowercase();
        match filter {
            "status" => match value.as_str() {
                "active" => self.state() == ForwardState::Active,
                "inactive" => self.state() != ForwardState::Active,
                other => ForwardState::parse(other).is_some_and(|s| self.state() == s),
            },
            "type" => self.kind.to_lowercase().contains(&value),
            "name" => self.name.to_lowercase().contains(&value),
            "protocol" => self.protocol.eq_ignore_ascii_case(&value),
            _ => self
                .text_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&value)),
        }
    }
}

/// Sortable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Namespace,
    Name,
    Status,
    Ports,
    LocalPort,
}

impl SortField {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "namespace" => Some(Self::Namespace),
            "name" => Some(Self::Name),
            "status" => Some(Self::Status),
            "ports" | "port" => Some(Self::Ports),
            "localport" | "local-port" => Some(Self::LocalPort),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Name => "name",
            Self::Status => "status",
            Self::Ports => "ports",
            Self::LocalPort => "localport",
        }
    }

    /// Total order with the documented tie-breaks
    fn compare(&self, a: &DisplayRow, b: &DisplayRow) -> Ordering {
        let by_name_port = || a.name.cmp(&b.name).then(a.port.cmp(&b.port));
        match self {
            Self::Namespace => a.namespace.cmp(&b.namespace).then_with(by_name_port),
            Self::Name => by_name_port(),
            Self::Status => a.state().cmp(&b.state()).then_with(by_name_port),
            Self::Ports => a.port.cmp(&b.port).then(a.name.cmp(&b.name)),
            Self::LocalPort => a
                .active_local_port()
                .cmp(&b.active_local_port())
                .then_with(by_name_port),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expand services into rows, overlaying known session state
pub fn expand_services(
    services: &[ServiceRecord],
    sessions: &HashMap<SessionKey, RowSession>,
) -> Vec<DisplayRow> {
    let mut rows = Vec::new();
    for svc in services {
        let base = DisplayRow {
            namespace: svc.namespace.clone(),
            name: svc.name.clone(),
            kind: svc.kind.clone(),
            cluster_ip: svc.cluster_ip.clone(),
            external_ip: svc.external_ip.clone(),
            port_name: PLACEHOLDER_PORT_NAME.to_string(),
            port: None,
            target_port: None,
            protocol: String::new(),
            created_at: svc.created_at,
            session: RowSession::default(),
        };

        if svc.ports.is_empty() {
            rows.push(base);
            continue;
        }

        for port in &svc.ports {
            let key = svc.key_for(port.port);
            rows.push(DisplayRow {
                port_name: if port.name.is_empty() {
                    "-".to_string()
                } else {
                    port.name.clone()
                },
                port: Some(port.port),
                target_port: port.target_port,
                protocol: port.protocol.clone(),
                session: sessions.get(&key).cloned().unwrap_or_default(),
                ..base.clone()
            });
        }
    }
    rows
}

/// Filtered, sorted, scrollable view over the service rows
#[derive(Debug, Default)]
pub struct ServiceTable {
    /// All rows in sort order
    rows: Vec<DisplayRow>,
    /// Indices into `rows` forming the active sequence
    active: Vec<usize>,
    /// Selection, an index into `active`
    selected: Option<usize>,
    /// First visible index into `active`
    offset: usize,
    /// Visible data rows
    viewport: usize,
    filters: Filters,
    sort: Option<(SortField, bool)>,
    sessions: HashMap<SessionKey, RowSession>,
    service_count: usize,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self {
            viewport: 1,
            ..Self::default()
        }
    }

    /// Replace the service snapshot, keeping sort, filters and the selected row
    pub fn set_records(&mut self, services: &[ServiceRecord]) {
        let previous = self.selected_row().map(DisplayRow::key);

        self.rows = expand_services(services, &self.sessions);
        self.service_count = services.len();
        if let Some((field, ascending)) = self.sort {
            self.sort_rows(field, ascending);
        }
        self.rebuild_active();

        self.selected = previous
            .and_then(|key| self.position_of(&key))
            .or_else(|| self.first_index());
        self.adjust_scroll();
    }

    /// Replace the session overlay from a manager snapshot
    pub fn sync_sessions(&mut self, snapshot: &[SessionInfo]) {
        self.sessions = snapshot
            .iter()
            .map(|info| (info.key.clone(), RowSession::from(info)))
            .collect();

        for row in &mut self.rows {
            if let Some(key) = row.session_key() {
                row.session = self.sessions.get(&key).cloned().unwrap_or_default();
            }
        }
        self.refresh_session_view();
    }

    /// Show `key` as establishing. Returns false if no row has the key.
    pub fn mark_pending(&mut self, key: &SessionKey) -> bool {
        self.overlay(
            key,
            RowSession {
                state: ForwardState::Pending,
                started_at: Some(SystemTime::now()),
                ..RowSession::default()
            },
        )
    }

    /// Show `key` as forwarding on `local_port`
    pub fn mark_active(&mut self, key: &SessionKey, local_port: u16) -> bool {
        let started_at = self
            .sessions
            .get(key)
            .and_then(|s| s.started_at)
            .unwrap_or_else(SystemTime::now);
        self.overlay(
            key,
            RowSession {
                state: ForwardState::Active,
                local_port: Some(local_port),
                started_at: Some(started_at),
                ..RowSession::default()
            },
        )
    }

    /// Show `key` as failed with `reason`
    pub fn mark_failed(&mut self, key: &SessionKey, reason: impl Into<String>) -> bool {
        let started_at = self.sessions.get(key).and_then(|s| s.started_at);
        self.overlay(
            key,
            RowSession {
                state: ForwardState::Failed,
                started_at,
                failure: Some(reason.into()),
                failed_at: Some(SystemTime::now()),
                ..RowSession::default()
            },
        )
    }

    /// Clear any session state for `key`
    pub fn mark_inactive(&mut self, key: &SessionKey) -> bool {
        self.overlay(key, RowSession::default())
    }

    fn overlay(&mut self, key: &SessionKey, session: RowSession) -> bool {
        let Some(row) = self
            .rows
            .iter_mut()
            .find(|row| row.session_key().as_ref() == Some(key))
        else {
            return false;
        };

        row.session = session.clone();
        if session.state == ForwardState::Inactive {
            self.sessions.remove(key);
        } else {
            self.sessions.insert(key.clone(), session);
        }
        self.refresh_session_view();
        true
    }

    /// Re-sort and re-filter when the view depends on session state
    fn refresh_session_view(&mut self) {
        let sorted_by_session = matches!(
            self.sort,
            Some((SortField::Status | SortField::LocalPort, _))
        );
        if !sorted_by_session && !self.filters.contains_key("status") {
            return;
        }

        let previous = self.selected_row().map(DisplayRow::key);
        if let Some((field, ascending)) = self.sort {
            self.sort_rows(field, ascending);
        }
        self.rebuild_active();

        self.selected = previous
            .and_then(|key| self.position_of(&key))
            .or_else(|| self.first_index());
        self.adjust_scroll();
    }

    /// Replace the filter set. Empty values are ignored.
    ///
    /// Resets the selection to the first matching row and scrolls to the top.
    pub fn apply_filters(&mut self, filters: &Filters) {
        self.filters = filters
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect();
        self.rebuild_active();
        self.selected = self.first_index();
        self.offset = 0;
    }

    /// Sort all rows; the selection follows its row
    pub fn sort_by(&mut self, field: SortField, ascending: bool) {
        let previous = self.selected_row().map(DisplayRow::key);

        self.sort = Some((field, ascending));
        self.sort_rows(field, ascending);
        self.rebuild_active();

        self.selected = previous
            .and_then(|key| self.position_of(&key))
            .or_else(|| self.first_index());
        self.adjust_scroll();
    }

    fn sort_rows(&mut self, field: SortField, ascending: bool) {
        self.rows.sort_by(|a, b| {
            let ordering = field.compare(a, b);
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }

    fn rebuild_active(&mut self) {
        let filters = &self.filters;
        self.active = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filters.iter().all(|(k, v)| row.matches(k, v)))
            .map(|(i, _)| i)
            .collect();
        if let Some(selected) = self.selected {
            if selected >= self.active.len() {
                self.selected = self.active.len().checked_sub(1);
            }
        }
    }

    fn position_of(&self, key: &RowKey) -> Option<usize> {
        self.active.iter().position(|&i| {
            let row = &self.rows[i];
            row.port == key.port && row.name == key.name && row.namespace == key.namespace
        })
    }

    fn first_index(&self) -> Option<usize> {
        (!self.active.is_empty()).then_some(0)
    }

    /// Move the cursor by `delta` rows, clamped to the active sequence
    pub fn move_selection(&mut self, delta: isize) {
        let Some(last) = self.active.len().checked_sub(1) else {
            return;
        };
        let current = self.selected.unwrap_or(0) as isize;
        let target = current.saturating_add(delta).clamp(0, last as isize);
        self.selected = Some(target as usize);
        self.adjust_scroll();
    }

    pub fn move_to_start(&mut self) {
        if !self.active.is_empty() {
            self.selected = Some(0);
            self.adjust_scroll();
        }
    }

    pub fn move_to_end(&mut self) {
        if let Some(last) = self.active.len().checked_sub(1) {
            self.selected = Some(last);
            self.adjust_scroll();
        }
    }

    /// Set how many data rows fit on screen
    pub fn set_viewport(&mut self, rows: usize) {
        self.viewport = rows.max(1);
        self.adjust_scroll();
    }

    fn adjust_scroll(&mut self) {
        let Some(selected) = self.selected else {
            self.offset = 0;
            return;
        };
        if selected < self.offset {
            self.offset = selected;
        } else if selected >= self.offset + self.viewport {
            self.offset = selected + 1 - self.viewport;
        }
        let max_offset = self.active.len().saturating_sub(self.viewport);
        self.offset = self.offset.min(max_offset);
    }

    pub fn selected_row(&self) -> Option<&DisplayRow> {
        self.selected
            .and_then(|i| self.active.get(i))
            .map(|&i| &self.rows[i])
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn viewport(&self) -> usize {
        self.viewport
    }

    /// Rows inside the scroll window, with their active-sequence index
    pub fn visible_window(&self) -> Vec<(usize, &DisplayRow)> {
        self.active
            .iter()
            .enumerate()
            .skip(self.offset)
            .take(self.viewport)
            .map(|(pos, &i)| (pos, &self.rows[i]))
            .collect()
    }

    /// Active sequence in display order
    pub fn active_rows(&self) -> impl Iterator<Item = &DisplayRow> {
        self.active.iter().map(|&i| &self.rows[i])
    }

    /// Every row of one service, in display order
    pub fn rows_for_service(&self, namespace: &str, name: &str) -> Vec<&DisplayRow> {
        self.rows
            .iter()
            .filter(|row| row.namespace == namespace && row.name == name)
            .collect()
    }

    pub fn find(&self, key: &SessionKey) -> Option<&DisplayRow> {
        self.rows
            .iter()
            .find(|row| row.session_key().as_ref() == Some(key))
    }

    /// Length of the active sequence
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn service_count(&self) -> usize {
        self.service_count
    }

    pub fn active_forward_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.state() == ForwardState::Active)
            .count()
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn is_filtered(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn sort(&self) -> Option<(SortField, bool)> {
        self.sort
    }

    /// Completion values for a filter type
    pub fn suggestions(&self, filter: &str) -> Vec<String> {
        let values: BTreeSet<String> = match filter {
            "status" => {
                return ["active", "inactive", "pending", "failed"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }
            "type" => self.rows.iter().map(|r| r.kind.clone()).collect(),
            "name" => self.rows.iter().map(|r| r.name.clone()).collect(),
            "protocol" => self
                .rows
                .iter()
                .filter(|r| !r.protocol.is_empty())
                .map(|r| r.protocol.clone())
                .collect(),
            _ => BTreeSet::new(),
        };
        values.into_iter().collect()
    }
}
