//! Time utilities for kpf
//!
//! Ages are rendered k9s-style: the largest whole unit only.

use std::time::{Duration, SystemTime};

/// Time elapsed since `since`.
///
/// Returns Duration::ZERO if `since` is in the future.
pub fn elapsed_since(since: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(since)
        .unwrap_or(Duration::ZERO)
}

/// Format a duration as a compact age (`42s`, `5m`, `3h`, `12d`)
pub fn format_age(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Age of an optional timestamp, `unknown` when absent
pub fn age_of(at: Option<SystemTime>) -> String {
    at.map(|t| format_age(elapsed_since(t)))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age_units() {
        assert_eq!(format_age(Duration::from_secs(0)), "0s");
        assert_eq!(format_age(Duration::from_secs(59)), "59s");
        assert_eq!(format_age(Duration::from_secs(60)), "1m");
        assert_eq!(format_age(Duration::from_secs(7200)), "2h");
        assert_eq!(format_age(Duration::from_secs(3 * 86400 + 5)), "3d");
    }

    #[test]
    fn test_elapsed_since_future_time() {
        let future = SystemTime::now() + Duration::from_secs(1000);
        assert_eq!(elapsed_since(future), Duration::ZERO);
    }

    #[test]
    fn test_age_of_missing() {
        assert_eq!(age_of(None), "unknown");
    }
}
