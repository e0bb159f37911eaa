//! Rendering
//!
//! Pure functions of [`App`] state; nothing here mutates the model.

use std::path::Path;

use ratatui::layout::{Alignment, Constraint, Flex, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};
use ratatui::Frame;

use kpf_core::time::{age_of, elapsed_since, format_age};
use kpf_core::ForwardState;

use crate::app::{App, View, MIN_PROMPT_PORT};
use crate::table::{DisplayRow, ServiceTable};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const SECTION_STYLE: Style = Style::new().fg(Color::Yellow).add_modifier(Modifier::BOLD);
const HEADER_STYLE: Style = Style::new().fg(Color::Black).bg(Color::Cyan);
const DIM_STYLE: Style = Style::new().fg(Color::DarkGray);

const HELP_TEXT: &str = "\
Navigation:
  up/k  down/j       Move selection
  pgup/pgdn          Page up/down (ctrl+u / ctrl+d)
  home/end           Go to top/bottom (ctrl+a / ctrl+e)
  enter/d            Service details
  esc/q              Back/Quit

Port forwarding:
  f/F                Toggle the forward for the selected port

Filtering:
  /                  Open the filter editor
  left/right         Cycle filter type (in editor)
  tab                Complete the value (in editor)
  enter              Apply the filter
  C                  Clear all filters (in editor)

  Filter types:
    search           Match any column
    status           active, inactive, pending, failed
    type             Service type (ClusterIP/NodePort/LoadBalancer)
    name             Service name (partial match)
    protocol         TCP/UDP/SCTP

Sorting (press again to reverse):
  N                  Namespace
  M                  Name
  S                  Status
  P                  Port
  L                  Local port

Other:
  r                  Refresh the service list
  ?/h                Show/hide this help
  ctrl+c             Quit

Status:
  \u{25cf} green            Forwarding
  \u{25cf} yellow           Establishing
  \u{25cf} red              Failed
  \u{25cb} gray             Inactive

Type:
  C  ClusterIP   N  NodePort   L  LoadBalancer   E  ExternalName   -  other";

/// Draw the whole screen
pub fn render(frame: &mut Frame, app: &App) {
    let [header, sections, body, status, footer] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(4),
        Constraint::Min(1),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_header(frame, app, header);
    render_sections(frame, app, sections);

    let base = match app.view() {
        View::Error => app.previous_view(),
        view => view,
    };
    match base {
        View::Detail => render_detail(frame, app, body),
        View::Help => render_help(frame, body),
        _ => render_table(frame, app.table(), body),
    }
    match base {
        View::PortPrompt => render_port_prompt(frame, app, body),
        View::Filter => render_filter_editor(frame, app, body),
        _ => {}
    }
    if app.view() == View::Error {
        render_error(frame, app, body);
    }

    let status_line = if app.is_loading() {
        "Loading services...".to_string()
    } else {
        app.status().unwrap_or_default().to_string()
    };
    frame.render_widget(Paragraph::new(status_line).style(DIM_STYLE), status);
    frame.render_widget(
        Paragraph::new(footer_text(app)).style(Style::new().fg(Color::Gray)),
        footer,
    );
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let left = format!(" KPF v{}", VERSION);
    let right = match app.cluster() {
        Some(cluster) => format!(
            "[ Cluster: {} | Config: {} ] ",
            cluster.host,
            config_label(&cluster.config_source)
        ),
        None => "[ Connecting... ] ".to_string(),
    };

    let width = area.width as usize;
    let text = if left.len() + right.len() <= width {
        format!("{}{}{}", left, " ".repeat(width - left.len() - right.len()), right)
    } else {
        left
    };
    frame.render_widget(Paragraph::new(text).style(HEADER_STYLE), area);
}

fn render_sections(frame: &mut Frame, app: &App, area: Rect) {
    let lines: Vec<Line> = section_lines(app)
        .into_iter()
        .map(|line| Line::styled(line, SECTION_STYLE))
        .collect();
    frame.render_widget(Paragraph::new(lines), area);
}

/// Lines of the section block above the table
pub fn section_lines(app: &App) -> Vec<String> {
    let table = app.table();
    let title = match app.view() {
        View::Help => "Help",
        View::Detail => "Service Details",
        View::Filter => "Filter Services",
        View::PortPrompt => "Port Conflict",
        _ => "Services",
    };

    let counts = if table.is_filtered() {
        format!(
            "Services ({}/{} filtered) - Active Forwards ({})",
            table.len(),
            table.total_rows(),
            table.active_forward_count()
        )
    } else {
        format!(
            "Services ({}) - Active Forwards ({})",
            table.service_count(),
            table.active_forward_count()
        )
    };

    let filters = if table.is_filtered() {
        let parts: Vec<String> = table
            .filters()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("Filters: {}", parts.join(", "))
    } else {
        String::new()
    };

    vec![
        title.to_string(),
        format!("Environment: {}", app.namespace()),
        counts,
        filters,
    ]
}

fn render_table(frame: &mut Frame, table: &ServiceTable, area: Rect) {
    let header = Row::new([
        "", "NAMESPACE", "NAME", "TYPE", "CLUSTER-IP", "EXTERNAL-IP", "PORT-NAME", "PORT",
        "LOCAL-PORT",
    ])
    .style(Style::new().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));

    let selected = table.selected_index();
    let rows: Vec<Row> = table
        .visible_window()
        .into_iter()
        .map(|(index, row)| {
            let style = if Some(index) == selected {
                Style::new().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
            } else {
                Style::new()
            };
            table_row(row).style(style)
        })
        .collect();

    let widths = [
        Constraint::Length(2),
        Constraint::Length(18),
        Constraint::Min(20),
        Constraint::Length(4),
        Constraint::Length(15),
        Constraint::Length(16),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Length(10),
    ];
    frame.render_widget(Table::new(rows, widths).header(header), area);
}

fn table_row(row: &DisplayRow) -> Row<'static> {
    let (symbol, color) = status_indicator(row.state());
    Row::new(vec![
        Cell::from(Span::styled(symbol, Style::new().fg(color))),
        Cell::from(row.namespace.clone()),
        Cell::from(row.name.clone()),
        Cell::from(compact_type(&row.kind)),
        Cell::from(row.cluster_ip.clone().unwrap_or_else(|| "-".to_string())),
        Cell::from(row.external_ip.clone().unwrap_or_else(|| "-".to_string())),
        Cell::from(row.port_name.clone()),
        Cell::from(port_label(row)),
        Cell::from(local_port_label(row)),
    ])
}

/// Indicator symbol and color for a forward state
pub fn status_indicator(state: ForwardState) -> (&'static str, Color) {
    match state {
        ForwardState::Active => ("\u{25cf}", Color::Green),
        ForwardState::Pending => ("\u{25cf}", Color::Yellow),
        ForwardState::Failed => ("\u{25cf}", Color::Red),
        ForwardState::Inactive => ("\u{25cb}", Color::Gray),
    }
}

/// One-letter service type
pub fn compact_type(kind: &str) -> &'static str {
    match kind {
        "ClusterIP" => "C",
        "NodePort" => "N",
        "LoadBalancer" => "L",
        "ExternalName" => "E",
        _ => "-",
    }
}

/// `80/TCP`, or `-` for a placeholder row
pub fn port_label(row: &DisplayRow) -> String {
    match row.port {
        Some(port) => format!("{}/{}", port, row.protocol),
        None => "-".to_string(),
    }
}

/// `:8080` while forwarding, blank otherwise
pub fn local_port_label(row: &DisplayRow) -> String {
    row.active_local_port()
        .map(|port| format!(":{}", port))
        .unwrap_or_default()
}

fn config_label(source: &str) -> &str {
    Path::new(source)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(source)
}

fn render_detail(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Service ");
    let Some(selected) = app.table().selected_row() else {
        frame.render_widget(Paragraph::new("No service selected").block(block), area);
        return;
    };

    let label = Style::new().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let field = |name: &'static str, value: String| {
        Line::from(vec![Span::styled(name, label), Span::raw(": "), Span::raw(value)])
    };

    let mut lines = vec![
        field("Service", selected.name.clone()),
        field("Namespace", selected.namespace.clone()),
        field("Type", selected.kind.clone()),
        field(
            "Cluster IP",
            selected.cluster_ip.clone().unwrap_or_else(|| "-".to_string()),
        ),
        field(
            "External IP",
            selected.external_ip.clone().unwrap_or_else(|| "-".to_string()),
        ),
        field("Age", age_of(selected.created_at)),
        Line::raw(""),
        Line::styled("Ports:", label),
    ];

    for row in app
        .table()
        .rows_for_service(&selected.namespace, &selected.name)
    {
        let Some(port) = row.port else {
            lines.push(Line::raw("  (none)"));
            continue;
        };
        let mut summary = format!("  \u{2022} {}: {}", row.port_name, port);
        if let Some(target) = row.target_port.filter(|&t| t != port) {
            summary.push_str(&format!(" \u{2192} {}", target));
        }
        summary.push_str(&format!(" ({})", row.protocol));
        lines.push(Line::raw(summary));

        let (_, color) = status_indicator(row.state());
        lines.push(Line::styled(
            format!("    Status: {}", port_status(row)),
            Style::new().fg(color),
        ));
    }

    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        area,
    );
}

/// Per-port status line of the detail view
pub fn port_status(row: &DisplayRow) -> String {
    let session = &row.session;
    let since = |at: Option<std::time::SystemTime>| {
        at.map(|t| format_age(elapsed_since(t)))
            .unwrap_or_else(|| "0s".to_string())
    };
    let local = session
        .local_port
        .map(|p| format!("localhost:{}", p))
        .unwrap_or_else(|| "localhost:?".to_string());

    match session.state {
        ForwardState::Active => format!("FORWARDING \u{2192} {} for {}", local, since(session.started_at)),
        ForwardState::Pending => {
            format!("ESTABLISHING \u{2192} {} for {}", local, since(session.started_at))
        }
        ForwardState::Failed => format!(
            "FAILED {} ago - {}",
            since(session.failed_at),
            session.failure.as_deref().unwrap_or("unknown error")
        ),
        ForwardState::Inactive => "INACTIVE".to_string(),
    }
}

fn render_help(frame: &mut Frame, area: Rect) {
    frame.render_widget(
        Paragraph::new(HELP_TEXT).block(Block::default().borders(Borders::ALL).title(" Help ")),
        area,
    );
}

fn popup(area: Rect, width: u16, height: u16) -> Rect {
    let [row] = Layout::vertical([Constraint::Length(height.min(area.height))])
        .flex(Flex::Center)
        .areas(area);
    let [popup] = Layout::horizontal([Constraint::Length(width.min(area.width))])
        .flex(Flex::Center)
        .areas(row);
    popup
}

fn render_port_prompt(frame: &mut Frame, app: &App, area: Rect) {
    let Some(prompt) = app.prompt() else {
        return;
    };
    let area = popup(area, 60, 9);
    frame.render_widget(Clear, area);

    let conflict = match prompt.conflict {
        Some(port) => format!("Port {} is already in use for {}", port, prompt.key),
        None => format!("Choose a local port for {}", prompt.key),
    };
    let lines = vec![
        Line::raw(conflict),
        Line::raw(""),
        Line::raw(format!(
            "Enter a local port ({}-65535):",
            MIN_PROMPT_PORT
        )),
        Line::raw(""),
        Line::styled(
            format!("Port: {}_", prompt.input),
            Style::new().add_modifier(Modifier::BOLD),
        ),
    ];
    frame.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::new().fg(Color::Yellow))
                .title(" Port Conflict "),
        ),
        area,
    );
}

fn render_filter_editor(frame: &mut Frame, app: &App, area: Rect) {
    let editor = app.filter_editor();
    let area = popup(area, 70, 14);
    frame.render_widget(Clear, area);

    let prompt = match editor.filter_type() {
        "status" => "Enter status filter: ",
        "type" => "Enter service type: ",
        "name" => "Enter name filter (partial match): ",
        "protocol" => "Enter protocol filter: ",
        _ => "Enter search term (searches all fields): ",
    };

    let mut lines = Vec::new();
    if app.table().is_filtered() {
        lines.push(Line::raw("Active filters:"));
        for (k, v) in app.table().filters() {
            lines.push(Line::raw(format!("  \u{2022} {}: {}", k, v)));
        }
        lines.push(Line::raw(""));
    }
    lines.push(Line::from(vec![
        Span::raw("Filter type (left/right to cycle): "),
        Span::styled(
            editor.filter_type(),
            Style::new().fg(Color::LightBlue).add_modifier(Modifier::BOLD),
        ),
    ]));
    lines.push(Line::raw(""));
    lines.push(Line::raw(format!("{}{}_", prompt, editor.input)));

    let input = editor.input.to_lowercase();
    let matches: Vec<String> = app
        .table()
        .suggestions(editor.filter_type())
        .into_iter()
        .filter(|s| s.to_lowercase().starts_with(&input))
        .collect();
    if !matches.is_empty() {
        lines.push(Line::raw(""));
        lines.push(Line::styled(
            format!("Suggestions (tab): {}", matches.join(", ")),
            DIM_STYLE,
        ));
    }

    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(" Filter ")),
        area,
    );
}

fn render_error(frame: &mut Frame, app: &App, area: Rect) {
    let area = popup(area, 60, 8);
    frame.render_widget(Clear, area);

    let message = app.error().unwrap_or("Unknown error");
    frame.render_widget(
        Paragraph::new(vec![
            Line::raw(message.to_string()),
            Line::raw(""),
            Line::styled("Press Enter, Esc or Space to continue", DIM_STYLE),
        ])
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::new().fg(Color::Red))
                .title(" Error "),
        ),
        area,
    );
}

/// Key hints for the current view
pub fn footer_text(app: &App) -> String {
    match app.view() {
        View::List => {
            let table = app.table();
            let position = match table.selected_index() {
                Some(index) => format!("[{}/{}]", index + 1, table.len()),
                None => "[0/0]".to_string(),
            };
            let sort = table
                .sort()
                .map(|(field, ascending)| {
                    format!(" [{}{}]", field, if ascending { "\u{2191}" } else { "\u{2193}" })
                })
                .unwrap_or_default();
            let filtered = if table.is_filtered() { " [FILTERED]" } else { "" };
            format!(
                "{}{}{} \u{2191}\u{2193}/jk:navigate f:toggle-forward enter:details /:filter \
                 N/M/S/P/L:sort r:refresh ?/h:help q:quit",
                position, sort, filtered
            )
        }
        View::Detail => "f:toggle-forward q/esc/b:back ctrl+c:exit".to_string(),
        View::Help => "Press ?/h or esc to close help".to_string(),
        View::PortPrompt => "enter:confirm esc:cancel".to_string(),
        View::Error => "enter/esc/space:dismiss".to_string(),
        View::Filter => "enter:apply esc:cancel tab:complete left/right:type C:clear-all".to_string(),
    }
}
