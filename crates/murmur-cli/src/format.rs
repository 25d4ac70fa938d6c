//! Human-readable timestamps for CLI output.

use chrono::{Local, TimeZone};

/// Compact age for conversation lists: "just now", "5m", "3h", "2d", then a
/// short date once older than a week.
pub fn format_conversation_time(timestamp: u64, now: u64) -> String {
    let diff = now.saturating_sub(timestamp);
    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{}m", diff / 60)
    } else if diff < 86400 {
        format!("{}h", diff / 3600)
    } else if diff < 604800 {
        format!("{}d", diff / 86400)
    } else {
        Local
            .timestamp_opt(timestamp as i64, 0)
            .single()
            .map(|dt| dt.format("%b %-d").to_string())
            .unwrap_or_default()
    }
}

pub fn format_full_date_time(timestamp: u64) -> String {
    Local
        .timestamp_opt(timestamp as i64, 0)
        .single()
        .map(|dt| dt.format("%b %-d, %Y, %H:%M").to_string())
        .unwrap_or_default()
}
