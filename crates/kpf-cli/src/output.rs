//! Plain terminal output used outside the TUI

use kpf_forward::SessionInfo;

/// Summary of the forwards closed on exit, `None` if none were active
pub fn format_closed_forwards(sessions: &[SessionInfo]) -> Option<String> {
    let lines: Vec<String> = sessions
        .iter()
        .filter(|s| s.is_active())
        .map(|s| match s.local_port {
            Some(port) => format!("  {} (localhost:{})", s.key, port),
            None => format!("  {}", s.key),
        })
        .collect();

    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "Closed {} forward{}:\n{}",
        lines.len(),
        if lines.len() == 1 { "" } else { "s" },
        lines.join("\n")
    ))
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message to stderr in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpf_core::{ForwardState, SessionKey};
    use std::time::SystemTime;

    fn session(port: u16, state: ForwardState, local_port: Option<u16>) -> SessionInfo {
        SessionInfo {
            id: port as u64,
            key: SessionKey::new("web", "frontend", port),
            state,
            local_port,
            started_at: SystemTime::now(),
            failure: None,
        }
    }

    #[test]
    fn test_no_active_forwards() {
        assert_eq!(format_closed_forwards(&[]), None);
        let pending = [session(80, ForwardState::Pending, Some(8080))];
        assert_eq!(format_closed_forwards(&pending), None);
    }

    #[test]
    fn test_closed_forward_summary() {
        let sessions = [
            session(80, ForwardState::Active, Some(18080)),
            session(443, ForwardState::Failed, None),
            session(9090, ForwardState::Active, Some(9090)),
        ];
        let summary = format_closed_forwards(&sessions).unwrap();
        assert!(summary.starts_with("Closed 2 forwards:"));
        assert!(summary.contains("web/frontend:80 (localhost:18080)"));
        assert!(!summary.contains(":443"));
    }
}
